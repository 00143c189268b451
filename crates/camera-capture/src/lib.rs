//! Camera Capture Library for Mixed-Reality Headsets
//!
//! Negotiates a capture profile, drives a camera session through its
//! lifecycle and converts the raw frames the device returns:
//! - Profile selection against device-advertised descriptions
//! - Session state machine for photo capture and video recording
//! - Bottom-up BGRA to top-down RGBA frame conversion

pub mod device;
pub mod events;
pub mod frame;
pub mod mock;
pub mod profile;
pub mod session;

pub use device::{CameraDevice, DeviceError, DeviceNotification, DeviceProvider, DeviceSelector};
pub use events::{StatusEvent, StatusSink, StopReason, TracingSink};
pub use frame::{convert, convert_into, FrameBuffer, FrameError, FrameProcessor, Grayscale, PixelLayout};
pub use profile::{
    select_profile, select_profile_with, select_resolution, CaptureDescription, CaptureTarget,
    DescriptorSet, FallbackPolicy, Profile, ProfileSelection, Resolution,
};
pub use session::{CaptureSession, RecordingHandle, RecordingState, SessionState};

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Device offers no capture profiles")]
    EmptyCatalog,

    #[error("No capture device matches {0}")]
    DeviceUnavailable(String),

    #[error("Camera initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capture already in progress")]
    CaptureBusy,

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Recording stopped while starting ({0:?})")]
    RecordingInterrupted(StopReason),

    #[error("Cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

impl CameraError {
    /// Non-fatal errors: the request was ignored and the session is intact
    pub fn is_recoverable(&self) -> bool {
        match self {
            CameraError::InvalidState { state, .. } => {
                !matches!(state, SessionState::Closed | SessionState::Failed)
            }
            CameraError::CaptureBusy
            | CameraError::AlreadyRecording
            | CameraError::RecordingInterrupted(_)
            | CameraError::Device(_) => true,
            _ => false,
        }
    }
}
