//! Device collaborator boundary
//!
//! The platform camera API lives behind two traits: [`DeviceProvider`]
//! enumerates devices and their profiles and opens one, [`CameraDevice`] is
//! the opened, exclusively owned handle. Notifications travel over an
//! unbounded channel handed out by [`CameraDevice::subscribe`].

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::FrameBuffer;
use crate::profile::{CaptureDescription, DescriptorSet, Profile};

/// Failure reported by the device collaborator, carrying its text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Enclosure panel a camera is mounted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Front,
    Back,
    Unknown,
}

/// Enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub panel: Panel,
    /// Supports configurable capture profiles
    pub supports_profiles: bool,
}

/// How to pick a device out of the enumeration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// First device that supports capture profiles
    #[default]
    SupportsProfiles,
    /// Exact device identifier
    Id(String),
    /// First profile-capable device on the given panel
    Panel(Panel),
}

impl DeviceSelector {
    /// Resolve against devices in enumeration order
    pub fn pick<'a>(&self, devices: &'a [DeviceInfo]) -> Option<&'a DeviceInfo> {
        devices.iter().find(|d| match self {
            DeviceSelector::SupportsProfiles => d.supports_profiles,
            DeviceSelector::Id(id) => &d.id == id,
            DeviceSelector::Panel(panel) => d.supports_profiles && d.panel == *panel,
        })
    }
}

/// Source of audio mixed into recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerMode {
    Microphone,
    System,
    MicrophoneAndSystem,
}

/// Camera view holograms are rendered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HologramPerspective {
    Display,
    PhotoVideoCamera,
}

/// Mixed-reality capture effects applied to a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixedRealityOptions {
    pub hologram_composition: bool,
    pub recording_indicator: bool,
    /// Global hologram opacity, 0.0 to 1.0
    pub global_opacity: f32,
    pub perspective: HologramPerspective,
    pub mixer_mode: MixerMode,
    /// System audio gain, 0.0 to 5.0
    pub loopback_gain: f32,
    /// Microphone gain, 0.0 to 5.0
    pub microphone_gain: f32,
}

impl Default for MixedRealityOptions {
    fn default() -> Self {
        Self {
            hologram_composition: true,
            recording_indicator: true,
            global_opacity: 0.0,
            perspective: HologramPerspective::PhotoVideoCamera,
            mixer_mode: MixerMode::MicrophoneAndSystem,
            loopback_gain: 5.0,
            microphone_gain: 5.0,
        }
    }
}

/// Everything the device needs to open with a negotiated profile
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSettings {
    pub device_id: String,
    pub profile: Profile,
    pub description: Option<CaptureDescription>,
    pub descriptor_set: DescriptorSet,
    pub effects: Option<MixedRealityOptions>,
}

/// Thermal state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalStatus {
    Normal,
    Overheated,
}

/// Camera stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    NotStreaming,
    Streaming,
    Shutdown,
}

/// Exclusive control status of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusiveControl {
    Available,
    SharedReadOnlyAvailable,
}

/// Asynchronous notification raised by an open device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceNotification {
    Failed { code: u32, message: String },
    /// Read the new value from [`CameraDevice::thermal_status`]
    ThermalStatusChanged,
    FocusChanged { locked: bool },
    ExclusiveControlChanged(ExclusiveControl),
    StreamStateChanged(StreamState),
    PhotoConfirmationCaptured,
    RecordLimitExceeded,
}

/// Device enumeration collaborator
pub trait DeviceProvider: Send + Sync + 'static {
    type Device: CameraDevice;

    /// Capture devices in enumeration order
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Profiles advertised by a device, in catalog order
    fn profiles(&self, device_id: &str) -> Vec<Profile>;

    /// Open a device with a negotiated profile
    fn open(
        &self,
        settings: OpenSettings,
    ) -> impl Future<Output = Result<Self::Device, DeviceError>> + Send;
}

/// Opened camera device, exclusively owned by one session
pub trait CameraDevice: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Register for notifications; dropping the receiver unregisters
    fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceNotification>;

    fn prepare_photo(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Capture one raw bottom-up BGRA frame
    fn capture_photo(&self) -> impl Future<Output = Result<FrameBuffer, DeviceError>> + Send;

    fn finish_photo(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Prepare a low-latency recording into `output`
    fn prepare_recording(
        &self,
        output: &Path,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn start_recording(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn pause_recording(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn resume_recording(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn stop_recording(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Release the recording pipeline and make the output durable
    fn finish_recording(&self) -> impl Future<Output = Result<(), DeviceError>> + Send;

    fn thermal_status(&self) -> ThermalStatus;

    /// Release the device handle
    fn close(&self);
}
