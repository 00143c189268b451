//! Capture session state machine
//!
//! A session exclusively owns one opened device. Caller operations and
//! device notifications both go through a single state mutex; the mutex is
//! never held across a device call, so notifications can interleave with
//! any in-flight operation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{
    CameraDevice, DeviceNotification, DeviceProvider, DeviceSelector, MixedRealityOptions,
    OpenSettings, ThermalStatus,
};
use crate::events::{StatusEvent, StatusSink, StopReason};
use crate::frame::FrameBuffer;
use crate::profile::{select_profile_with, CaptureTarget, DescriptorSet, FallbackPolicy, ProfileSelection};
use crate::CameraError;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Initializing,
    Ready,
    Capturing,
    Recording,
    Paused,
    Finishing,
    Closed,
    Failed,
}

/// Recording progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Requested, device not started yet
    Idle,
    Active,
    Paused,
}

/// In-flight recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHandle {
    output_path: PathBuf,
    state: RecordingState,
    /// Stop requested while the device was still starting
    cancelled: Option<StopReason>,
}

impl RecordingHandle {
    fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            state: RecordingState::Idle,
            cancelled: None,
        }
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub selector: DeviceSelector,
    pub target: CaptureTarget,
    pub descriptor_set: DescriptorSet,
    pub fallback: FallbackPolicy,
    pub effects: Option<MixedRealityOptions>,
}

impl SessionRequest {
    pub fn new(selector: DeviceSelector, target: CaptureTarget, descriptor_set: DescriptorSet) -> Self {
        Self {
            selector,
            target,
            descriptor_set,
            fallback: FallbackPolicy::default(),
            effects: None,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_effects(mut self, effects: MixedRealityOptions) -> Self {
        self.effects = Some(effects);
        self
    }
}

/// Opened device plus its notification subscription.
///
/// Dropping the lease unsubscribes and releases the device.
struct DeviceLease<D: CameraDevice> {
    device: Arc<D>,
    forwarder: Option<JoinHandle<()>>,
}

impl<D: CameraDevice> Drop for DeviceLease<D> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.device.close();
        debug!(device = %self.device.id(), "Device released");
    }
}

struct Inner<D: CameraDevice> {
    state: SessionState,
    lease: Option<DeviceLease<D>>,
    selection: Option<ProfileSelection>,
    descriptor_set: Option<DescriptorSet>,
    photo_prepared: bool,
    recording: Option<RecordingHandle>,
}

impl<D: CameraDevice> Inner<D> {
    fn device(&self, operation: &'static str) -> Result<Arc<D>, CameraError> {
        self.lease
            .as_ref()
            .map(|lease| lease.device.clone())
            .ok_or(CameraError::InvalidState {
                operation,
                state: self.state,
            })
    }

    /// A device call is changing the recording; `cleanup` waits for it
    fn in_transition(&self) -> bool {
        self.state == SessionState::Finishing
            || self
                .recording
                .as_ref()
                .is_some_and(|handle| handle.state == RecordingState::Idle)
    }
}

struct Shared<D: CameraDevice> {
    inner: Mutex<Inner<D>>,
    sink: Arc<dyn StatusSink>,
    /// Signalled whenever a finalization leaves `Finishing`
    settled: Notify,
}

impl<D: CameraDevice> Shared<D> {
    fn lock(&self) -> MutexGuard<'_, Inner<D>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StatusEvent) {
        self.sink.emit(event);
    }

    /// Stop and finish the active recording, if any. Safe to race.
    async fn finalize_recording(&self, reason: StopReason) -> Result<Option<PathBuf>, CameraError> {
        let (device, handle) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Recording | SessionState::Paused => {}
                _ => return Ok(None),
            }
            if let Some(handle) = inner.recording.as_mut() {
                if handle.state == RecordingState::Idle {
                    // start() owns the device until it returns and stops it itself
                    handle.cancelled.get_or_insert(reason);
                    debug!(?reason, "Stop requested while recording is starting");
                    return Ok(None);
                }
            }
            let device = inner.device("stop recording")?;
            inner.state = SessionState::Finishing;
            (device, inner.recording.take())
        };

        let stopped = device.stop_recording().await;
        let finished = device.finish_recording().await;

        {
            let mut inner = self.lock();
            if inner.state == SessionState::Finishing {
                inner.state = SessionState::Ready;
            }
        }
        self.settled.notify_waiters();

        let Some(handle) = handle else {
            return Ok(None);
        };

        if let Err(e) = &stopped {
            error!(error = %e, "Failed to stop recording");
        }
        if let Err(e) = &finished {
            error!(error = %e, "Failed to finish recording");
        }

        info!(path = %handle.output_path.display(), ?reason, "Recording finalized");
        self.emit(StatusEvent::RecordingFinalized {
            output_path: handle.output_path.clone(),
            reason,
        });

        stopped?;
        finished?;
        Ok(Some(handle.output_path))
    }

    async fn wait_until_settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.lock().in_transition() {
                return;
            }
            notified.await;
        }
    }

    async fn handle_notification(&self, notification: DeviceNotification) {
        debug!(?notification, "Device notification");

        let interrupt = match notification {
            DeviceNotification::Failed { code, message } => {
                error!(code, %message, "MediaCapture failed");
                self.emit(StatusEvent::DeviceFailed { code, message });
                Some(StopReason::DeviceFailure)
            }
            DeviceNotification::ThermalStatusChanged => {
                let device = self.lock().lease.as_ref().map(|lease| lease.device.clone());
                match device.map(|device| device.thermal_status()) {
                    Some(ThermalStatus::Overheated) => {
                        warn!("Thermal status is overheated");
                        self.emit(StatusEvent::Overheat);
                        Some(StopReason::Overheat)
                    }
                    status => {
                        debug!(?status, "Thermal status changed");
                        None
                    }
                }
            }
            DeviceNotification::RecordLimitExceeded => {
                warn!("Record limitation exceeded");
                self.emit(StatusEvent::RecordLimitExceeded);
                Some(StopReason::RecordLimitExceeded)
            }
            DeviceNotification::FocusChanged { locked } => {
                self.emit(StatusEvent::FocusChanged { locked });
                None
            }
            DeviceNotification::ExclusiveControlChanged(status) => {
                self.emit(StatusEvent::ExclusiveControlChanged(status));
                None
            }
            DeviceNotification::StreamStateChanged(state) => {
                self.emit(StatusEvent::StreamStateChanged(state));
                None
            }
            DeviceNotification::PhotoConfirmationCaptured => {
                self.emit(StatusEvent::PhotoConfirmationCaptured);
                None
            }
        };

        if let Some(reason) = interrupt {
            match self.finalize_recording(reason).await {
                Ok(Some(path)) => {
                    warn!(path = %path.display(), ?reason, "Recording force-stopped")
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to force-stop recording"),
            }
        }
    }
}

async fn forward_notifications<D: CameraDevice>(
    shared: Weak<Shared<D>>,
    mut notifications: mpsc::UnboundedReceiver<DeviceNotification>,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_notification(notification).await;
    }
    debug!("Notification forwarding ended");
}

/// Live binding to one camera device plus its lifecycle state
pub struct CaptureSession<P: DeviceProvider> {
    provider: Arc<P>,
    shared: Arc<Shared<P::Device>>,
}

impl<P: DeviceProvider> CaptureSession<P> {
    /// Create an unopened session reporting to `sink`
    pub fn new(provider: Arc<P>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            provider,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Unopened,
                    lease: None,
                    selection: None,
                    descriptor_set: None,
                    photo_prepared: false,
                    recording: None,
                }),
                sink,
                settled: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn selection(&self) -> Option<ProfileSelection> {
        self.shared.lock().selection.clone()
    }

    pub fn recording(&self) -> Option<RecordingHandle> {
        self.shared.lock().recording.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == SessionState::Capturing
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state(), SessionState::Recording | SessionState::Paused)
    }

    /// Pick a device, negotiate a profile and open the device.
    ///
    /// On failure the session moves to `Failed` and must be discarded.
    pub async fn initialize(&self, request: &SessionRequest) -> Result<ProfileSelection, CameraError> {
        {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::Unopened {
                return Err(CameraError::InvalidState {
                    operation: "initialize",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Initializing;
        }

        let (device, selection) = match self.open_device(request).await {
            Ok(opened) => opened,
            Err(e) => {
                let mut inner = self.shared.lock();
                if inner.state == SessionState::Initializing {
                    inner.state = SessionState::Failed;
                }
                return Err(e);
            }
        };

        let device = Arc::new(device);
        let notifications = device.subscribe();
        let forwarder = tokio::spawn(forward_notifications(
            Arc::downgrade(&self.shared),
            notifications,
        ));
        let lease = DeviceLease {
            device,
            forwarder: Some(forwarder),
        };
        let device_id = lease.device.id().to_string();

        let state = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Initializing {
                inner.state = SessionState::Ready;
                inner.lease = Some(lease);
                inner.selection = Some(selection.clone());
                inner.descriptor_set = Some(request.descriptor_set);
                None
            } else {
                Some((inner.state, lease))
            }
        };

        // cleaned up while the device was opening
        if let Some((state, lease)) = state {
            drop(lease);
            return Err(CameraError::InvalidState {
                operation: "initialize",
                state,
            });
        }

        info!(device = %device_id, "Capture session ready");
        self.shared.emit(StatusEvent::SessionReady { device_id });
        Ok(selection)
    }

    async fn open_device(
        &self,
        request: &SessionRequest,
    ) -> Result<(P::Device, ProfileSelection), CameraError> {
        let devices = self.provider.devices();
        let Some(info) = request.selector.pick(&devices) else {
            error!(selector = ?request.selector, "No capture device available");
            self.shared.emit(StatusEvent::DeviceUnavailable {
                selector: request.selector.clone(),
            });
            return Err(CameraError::DeviceUnavailable(format!("{:?}", request.selector)));
        };
        info!(device = %info.id, name = %info.name, panel = ?info.panel, "Using capture device");

        let profiles = self.provider.profiles(&info.id);
        for profile in &profiles {
            for d in profile.descriptions(request.descriptor_set) {
                debug!(
                    profile = %profile.id,
                    width = d.width,
                    height = d.height,
                    frame_rate = d.frame_rate,
                    "Supported size & frame rate"
                );
            }
        }

        let selection = select_profile_with(
            &profiles,
            &request.target,
            request.descriptor_set,
            request.fallback,
        )?;
        if selection.is_fallback() {
            self.shared.emit(StatusEvent::ProfileNotFound {
                want: request.target,
                descriptor_set: request.descriptor_set,
            });
        }
        self.shared.emit(StatusEvent::ProfileSelected {
            profile: selection.profile.id.clone(),
            description: selection.description,
        });

        let settings = OpenSettings {
            device_id: info.id.clone(),
            profile: selection.profile.clone(),
            description: selection.description,
            descriptor_set: request.descriptor_set,
            effects: request.effects.clone(),
        };

        match self.provider.open(settings).await {
            Ok(device) => Ok((device, selection)),
            Err(e) => {
                error!(error = %e, "Device rejected configuration");
                self.shared.emit(StatusEvent::InitializationFailed {
                    message: e.message.clone(),
                });
                Err(CameraError::InitializationFailed(e.message))
            }
        }
    }

    /// Prepare the low-latency photo pipeline. Idempotent.
    ///
    /// Record sessions prepare per recording, so this is a no-op for them.
    pub async fn prepare(&self) -> Result<(), CameraError> {
        let device = {
            let inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => {}
                SessionState::Capturing
                | SessionState::Recording
                | SessionState::Paused
                | SessionState::Finishing => return Ok(()),
                state => {
                    return Err(CameraError::InvalidState {
                        operation: "prepare",
                        state,
                    })
                }
            }
            if inner.photo_prepared || inner.descriptor_set != Some(DescriptorSet::Photo) {
                return Ok(());
            }
            inner.device("prepare")?
        };

        device.prepare_photo().await?;
        self.shared.lock().photo_prepared = true;
        debug!("Low-latency photo capture prepared");
        Ok(())
    }

    /// Capture one raw frame. Fails with `CaptureBusy` while a capture is in flight.
    pub async fn capture(&self) -> Result<FrameBuffer, CameraError> {
        let begun = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => inner.device("capture").map(|device| {
                    inner.state = SessionState::Capturing;
                    (device, !inner.photo_prepared)
                }),
                SessionState::Capturing => Err(CameraError::CaptureBusy),
                state => Err(CameraError::InvalidState {
                    operation: "capture",
                    state,
                }),
            }
        };

        let (device, needs_prepare) = match begun {
            Ok(begun) => begun,
            Err(CameraError::CaptureBusy) => {
                warn!("Capture already in progress");
                self.shared.emit(StatusEvent::CaptureBusy);
                return Err(CameraError::CaptureBusy);
            }
            Err(e) => return Err(e),
        };

        if needs_prepare {
            if let Err(e) = device.prepare_photo().await {
                self.end_capture(false);
                return Err(e.into());
            }
        }

        let captured = device.capture_photo().await;
        self.end_capture(needs_prepare);

        let frame = captured?;
        debug!(width = frame.width(), height = frame.height(), "Photo captured");
        Ok(frame)
    }

    fn end_capture(&self, prepared: bool) {
        let mut inner = self.shared.lock();
        if prepared {
            inner.photo_prepared = true;
        }
        if inner.state == SessionState::Capturing {
            inner.state = SessionState::Ready;
        }
    }

    /// Start recording into `output_path`.
    ///
    /// Reports `AlreadyRecording` without side effects if a recording is active.
    /// A stop that arrives before the device has started is applied once it
    /// has, and the start fails with `RecordingInterrupted`.
    pub async fn start(&self, output_path: PathBuf) -> Result<(), CameraError> {
        let begun = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => inner.device("start recording").map(|device| {
                    inner.state = SessionState::Recording;
                    inner.recording = Some(RecordingHandle::new(output_path.clone()));
                    device
                }),
                SessionState::Recording | SessionState::Paused | SessionState::Finishing => {
                    Err(CameraError::AlreadyRecording)
                }
                state => Err(CameraError::InvalidState {
                    operation: "start recording",
                    state,
                }),
            }
        };

        let device = match begun {
            Ok(device) => device,
            Err(CameraError::AlreadyRecording) => {
                warn!("Already starting capture");
                self.shared.emit(StatusEvent::AlreadyRecording);
                return Err(CameraError::AlreadyRecording);
            }
            Err(e) => return Err(e),
        };

        info!(path = %output_path.display(), "Start recording");
        let started = async {
            device.prepare_recording(&output_path).await?;
            device.start_recording().await
        }
        .await;

        let cancelled = {
            let mut inner = self.shared.lock();
            let cancelled = match inner.recording.as_mut() {
                Some(handle) if handle.output_path == output_path => {
                    if started.is_ok() && handle.cancelled.is_none() {
                        handle.state = RecordingState::Active;
                    }
                    handle.cancelled
                }
                _ => Some(StopReason::Cleanup),
            };
            if started.is_err() || cancelled.is_some() {
                inner.recording = None;
                if inner.state == SessionState::Recording {
                    inner.state = if started.is_ok() {
                        SessionState::Finishing
                    } else {
                        SessionState::Ready
                    };
                }
            }
            cancelled
        };

        let result = match (started, cancelled) {
            (Err(e), _) => {
                error!(error = %e, "Failed to start recording");
                Err(e.into())
            }
            (Ok(()), None) => {
                self.shared
                    .emit(StatusEvent::RecordingStarted { output_path });
                Ok(())
            }
            (Ok(()), Some(reason)) => {
                warn!(?reason, "Recording interrupted while starting");
                self.abandon_recording(&device).await;
                Err(CameraError::RecordingInterrupted(reason))
            }
        };
        self.shared.settled.notify_waiters();
        result
    }

    /// Stop a recording the device started after a stop was already requested
    async fn abandon_recording(&self, device: &P::Device) {
        if let Err(e) = device.stop_recording().await {
            error!(error = %e, "Failed to stop interrupted recording");
        }
        if let Err(e) = device.finish_recording().await {
            error!(error = %e, "Failed to finish interrupted recording");
        }
        let mut inner = self.shared.lock();
        if inner.state == SessionState::Finishing {
            inner.state = SessionState::Ready;
        }
    }

    pub async fn pause(&self) -> Result<(), CameraError> {
        let device = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Recording
                    if inner.recording.as_ref().map(|h| h.state) == Some(RecordingState::Active) =>
                {
                    let device = inner.device("pause")?;
                    inner.state = SessionState::Paused;
                    if let Some(handle) = inner.recording.as_mut() {
                        handle.state = RecordingState::Paused;
                    }
                    device
                }
                SessionState::Paused => return Ok(()),
                state => {
                    return Err(CameraError::InvalidState {
                        operation: "pause",
                        state,
                    })
                }
            }
        };

        if let Err(e) = device.pause_recording().await {
            self.revert(SessionState::Paused, SessionState::Recording, RecordingState::Active);
            return Err(e.into());
        }
        info!("Recording paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), CameraError> {
        let device = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Paused => {
                    let device = inner.device("resume")?;
                    inner.state = SessionState::Recording;
                    if let Some(handle) = inner.recording.as_mut() {
                        handle.state = RecordingState::Active;
                    }
                    device
                }
                SessionState::Recording => return Ok(()),
                state => {
                    return Err(CameraError::InvalidState {
                        operation: "resume",
                        state,
                    })
                }
            }
        };

        if let Err(e) = device.resume_recording().await {
            self.revert(SessionState::Recording, SessionState::Paused, RecordingState::Paused);
            return Err(e.into());
        }
        info!("Recording resumed");
        Ok(())
    }

    fn revert(&self, from: SessionState, to: SessionState, recording: RecordingState) {
        let mut inner = self.shared.lock();
        if inner.state == from {
            inner.state = to;
            if let Some(handle) = inner.recording.as_mut() {
                handle.state = recording;
            }
        }
    }

    /// Stop and finalize the recording, returning its path.
    ///
    /// Returns `Ok(None)` when nothing is recording, including when a device
    /// notification already stopped it.
    pub async fn stop(&self) -> Result<Option<PathBuf>, CameraError> {
        self.shared.finalize_recording(StopReason::Requested).await
    }

    /// Release the device. Finalizes any recording first. Idempotent.
    pub async fn cleanup(&self) {
        if matches!(self.state(), SessionState::Unopened | SessionState::Closed) {
            return;
        }

        if let Err(e) = self.shared.finalize_recording(StopReason::Cleanup).await {
            warn!(error = %e, "Recording did not finalize cleanly");
        }
        self.shared.wait_until_settled().await;

        let (lease, photo_prepared) = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Closed;
            inner.recording = None;
            (inner.lease.take(), std::mem::take(&mut inner.photo_prepared))
        };

        if let Some(lease) = lease {
            if photo_prepared {
                if let Err(e) = lease.device.finish_photo().await {
                    warn!(error = %e, "Failed to finish photo capture");
                }
            }
            drop(lease);
        }

        info!("Cleaned up");
        self.shared.emit(StatusEvent::SessionClosed);
    }
}

impl<P: DeviceProvider> Drop for CaptureSession<P> {
    fn drop(&mut self) {
        let state = self.state();
        if !matches!(state, SessionState::Unopened | SessionState::Closed) {
            warn!(?state, "Capture session dropped without cleanup");
        }
    }
}
