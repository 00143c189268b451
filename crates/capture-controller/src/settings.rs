//! Capture settings
//!
//! Loaded from an optional TOML file, then overridden by `CAMERA__*`
//! environment variables (`CAMERA__PHOTO__GRAYSCALE=true`).

use std::path::{Path, PathBuf};

use camera_capture::device::{DeviceSelector, MixedRealityOptions};
use camera_capture::{CaptureTarget, FallbackPolicy};
use serde::{Deserialize, Serialize};

use crate::ControllerError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CAMERA";

/// Photo flow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoSettings {
    pub target: CaptureTarget,
    /// Mirror frames for a selfie-style preview
    pub mirror_horizontally: bool,
    pub grayscale: bool,
    pub output_dir: PathBuf,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            target: CaptureTarget::new(1280, 720, 15.0),
            mirror_horizontally: false,
            grayscale: false,
            output_dir: PathBuf::from("captures/photos"),
        }
    }
}

/// Video flow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub target: CaptureTarget,
    pub output_dir: PathBuf,
    pub mixed_reality: MixedRealityOptions,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            target: CaptureTarget::new(960, 540, 30.0),
            output_dir: PathBuf::from("captures/videos"),
            mixed_reality: MixedRealityOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub device: DeviceSelector,
    pub fallback: FallbackPolicy,
    pub photo: PhotoSettings,
    pub video: VideoSettings,
}

impl CaptureSettings {
    /// Load settings from `path` (if given) and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ControllerError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let settings: CaptureSettings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        validate_target("photo.target", &self.photo.target)?;
        validate_target("video.target", &self.video.target)?;

        let mr = &self.video.mixed_reality;
        if !(0.0..=1.0).contains(&mr.global_opacity) {
            return Err(invalid(format!(
                "video.mixed_reality.global_opacity must be within 0.0..=1.0, got {}",
                mr.global_opacity
            )));
        }
        for (name, gain) in [
            ("loopback_gain", mr.loopback_gain),
            ("microphone_gain", mr.microphone_gain),
        ] {
            if !(0.0..=5.0).contains(&gain) {
                return Err(invalid(format!(
                    "video.mixed_reality.{name} must be within 0.0..=5.0, got {gain}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_target(name: &str, target: &CaptureTarget) -> Result<(), ControllerError> {
    if target.width == 0 || target.height == 0 {
        return Err(invalid(format!(
            "{name} must have non-zero dimensions, got {}x{}",
            target.width, target.height
        )));
    }
    if !target.frame_rate.is_finite() || target.frame_rate <= 0.0 {
        return Err(invalid(format!(
            "{name}.frame_rate must be positive, got {}",
            target.frame_rate
        )));
    }
    Ok(())
}

fn invalid(message: String) -> ControllerError {
    ControllerError::InvalidConfig(message)
}
