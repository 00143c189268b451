//! Status events reported by a capture session

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::device::{DeviceSelector, ExclusiveControl, StreamState};
use crate::profile::{CaptureDescription, CaptureTarget, DescriptorSet};

/// Why a recording was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Requested,
    Overheat,
    DeviceFailure,
    RecordLimitExceeded,
    Cleanup,
}

/// Severity used when rendering an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Structured status event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StatusEvent {
    ProfileSelected {
        profile: String,
        description: Option<CaptureDescription>,
    },
    ProfileNotFound {
        want: CaptureTarget,
        descriptor_set: DescriptorSet,
    },
    DeviceUnavailable {
        selector: DeviceSelector,
    },
    InitializationFailed {
        message: String,
    },
    SessionReady {
        device_id: String,
    },
    CaptureBusy,
    AlreadyRecording,
    RecordingStarted {
        output_path: PathBuf,
    },
    RecordingFinalized {
        output_path: PathBuf,
        reason: StopReason,
    },
    Overheat,
    RecordLimitExceeded,
    DeviceFailed {
        code: u32,
        message: String,
    },
    FocusChanged {
        locked: bool,
    },
    ExclusiveControlChanged(ExclusiveControl),
    StreamStateChanged(StreamState),
    PhotoConfirmationCaptured,
    SessionClosed,
}

impl StatusEvent {
    pub fn severity(&self) -> Severity {
        match self {
            StatusEvent::DeviceUnavailable { .. }
            | StatusEvent::InitializationFailed { .. }
            | StatusEvent::DeviceFailed { .. } => Severity::Error,
            StatusEvent::ProfileNotFound { .. }
            | StatusEvent::CaptureBusy
            | StatusEvent::AlreadyRecording
            | StatusEvent::Overheat
            | StatusEvent::RecordLimitExceeded => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Receiver of status events
pub trait StatusSink: Send + Sync + 'static {
    fn emit(&self, event: StatusEvent);
}

impl<F> StatusSink for F
where
    F: Fn(StatusEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: StatusEvent) {
        self(event)
    }
}

impl StatusSink for mpsc::UnboundedSender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        // receiver gone means nobody is listening
        let _ = self.send(event);
    }
}

/// Renders events through `tracing` at their severity
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event.severity() {
            Severity::Error => error!(?event, "Camera status"),
            Severity::Warning => warn!(?event, "Camera status"),
            Severity::Info => info!(?event, "Camera status"),
        }
    }
}
