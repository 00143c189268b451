//! Capture profile negotiation
//!
//! Picks a (profile, description) pair out of the catalog a device
//! advertises. Iteration order is catalog order; the catalog is never
//! re-sorted here.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::CameraError;

/// A concrete (width, height, frame rate) capability entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureDescription {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl CaptureDescription {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    fn matches(&self, want: &CaptureTarget) -> bool {
        self.width == want.width
            && self.height == want.height
            && self.frame_rate.round() == want.frame_rate.round()
    }
}

/// Requested capture geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl CaptureTarget {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

/// Which of a profile's description sets to negotiate against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorSet {
    Photo,
    Record,
}

/// Device configuration bundle with distinct photo and record descriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Opaque identifier understood by the device collaborator
    pub id: String,
    pub photo_descriptions: Vec<CaptureDescription>,
    pub record_descriptions: Vec<CaptureDescription>,
}

impl Profile {
    pub fn descriptions(&self, set: DescriptorSet) -> &[CaptureDescription] {
        match set {
            DescriptorSet::Photo => &self.photo_descriptions,
            DescriptorSet::Record => &self.record_descriptions,
        }
    }
}

/// What to do when no description matches the target exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// First profile with its first description
    #[default]
    FirstAvailable,
    /// First entry with the requested resolution at any frame rate, then
    /// first available
    MatchResolution,
}

/// How a selection was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionOutcome {
    Exact,
    /// Resolution matched, frame rate did not
    Resolution,
    FirstAvailable,
}

/// The chosen pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSelection {
    pub profile: Profile,
    /// `None` only when the fallback profile advertises nothing for the set
    pub description: Option<CaptureDescription>,
    pub outcome: SelectionOutcome,
}

impl ProfileSelection {
    /// True when the caller should raise a `ProfileNotFound` warning
    pub fn is_fallback(&self) -> bool {
        self.outcome != SelectionOutcome::Exact
    }
}

/// Select the first (profile, description) matching `want` exactly
pub fn select_profile(
    profiles: &[Profile],
    want: &CaptureTarget,
    set: DescriptorSet,
) -> Result<ProfileSelection, CameraError> {
    select_profile_with(profiles, want, set, FallbackPolicy::FirstAvailable)
}

/// Select with an explicit fallback policy
pub fn select_profile_with(
    profiles: &[Profile],
    want: &CaptureTarget,
    set: DescriptorSet,
    policy: FallbackPolicy,
) -> Result<ProfileSelection, CameraError> {
    let first = profiles.first().ok_or(CameraError::EmptyCatalog)?;

    let mut candidates = profiles
        .iter()
        .flat_map(|p| p.descriptions(set).iter().map(move |d| (p, d)));

    if let Some((profile, desc)) = candidates.clone().find(|(_, d)| d.matches(want)) {
        info!(
            profile = %profile.id,
            width = desc.width,
            height = desc.height,
            frame_rate = desc.frame_rate,
            "Selected capture description"
        );
        return Ok(ProfileSelection {
            profile: profile.clone(),
            description: Some(*desc),
            outcome: SelectionOutcome::Exact,
        });
    }

    if policy == FallbackPolicy::MatchResolution {
        if let Some((profile, desc)) =
            candidates.find(|(_, d)| d.width == want.width && d.height == want.height)
        {
            warn!(
                profile = %profile.id,
                wanted_fps = want.frame_rate,
                frame_rate = desc.frame_rate,
                "No exact profile match, using same resolution at a different frame rate"
            );
            return Ok(ProfileSelection {
                profile: profile.clone(),
                description: Some(*desc),
                outcome: SelectionOutcome::Resolution,
            });
        }
    }

    warn!(
        width = want.width,
        height = want.height,
        frame_rate = want.frame_rate,
        profile = %first.id,
        "Can't find profile, falling back to first available"
    );

    Ok(ProfileSelection {
        profile: first.clone(),
        description: first.descriptions(set).first().copied(),
        outcome: SelectionOutcome::FirstAvailable,
    })
}

/// Bare resolution advertised by the simpler photo API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

impl Resolution {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Pick an exact resolution or the largest one available.
///
/// Returns the resolution and whether it matched exactly.
pub fn select_resolution(
    resolutions: &[Resolution],
    width: u32,
    height: u32,
) -> Result<(Resolution, bool), CameraError> {
    let mut ordered = resolutions.to_vec();
    // stable: equal areas keep catalog order
    ordered.sort_by(|a, b| b.area().cmp(&a.area()));

    let largest = *ordered.first().ok_or(CameraError::EmptyCatalog)?;

    match ordered
        .iter()
        .find(|r| r.width == width && r.height == height)
    {
        Some(r) => {
            debug!(width = r.width, height = r.height, "Matched camera resolution");
            Ok((*r, true))
        }
        None => {
            warn!(
                width = largest.width,
                height = largest.height,
                "Resolution not supported, using largest"
            );
            Ok((largest, false))
        }
    }
}
