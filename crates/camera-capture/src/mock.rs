//! Scripted in-memory camera for tests and demos (no hardware required)

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::device::{
    CameraDevice, DeviceError, DeviceInfo, DeviceNotification, DeviceProvider, OpenSettings,
    Panel, ThermalStatus,
};
use crate::frame::{FrameBuffer, PixelLayout};
use crate::profile::{CaptureDescription, Profile};

/// Frame size used when the open settings carry no description
const DEFAULT_FRAME: (u32, u32) = (64, 36);

#[derive(Default)]
struct MockState {
    open_devices: HashSet<String>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<DeviceNotification>>>,
    fail_open: Option<String>,
    fail_start_recording: Option<String>,
    capture_delay: Duration,
    prepare_recording_delay: Duration,
    thermal: Option<ThermalStatus>,
    calls: Vec<String>,
    opened_with: Option<OpenSettings>,
    finalized: Vec<PathBuf>,
}

/// Handle for scripting the mock and inspecting what it was asked to do
#[derive(Clone, Default)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

impl MockControl {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: &str) {
        self.lock().calls.push(call.to_string());
    }

    /// Deliver a notification to every subscriber of every open device.
    ///
    /// Returns how many subscribers received it.
    pub fn notify(&self, notification: DeviceNotification) -> usize {
        let mut state = self.lock();
        let mut delivered = 0;
        for senders in state.subscribers.values_mut() {
            senders.retain(|tx| tx.send(notification.clone()).is_ok());
            delivered += senders.len();
        }
        delivered
    }

    /// Make the next opens fail with `message`
    pub fn fail_open(&self, message: &str) {
        self.lock().fail_open = Some(message.to_string());
    }

    /// Make recordings fail to start with `message`
    pub fn fail_start_recording(&self, message: &str) {
        self.lock().fail_start_recording = Some(message.to_string());
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        self.lock().capture_delay = delay;
    }

    /// Keep `prepare_recording` pending for `delay`
    pub fn set_prepare_recording_delay(&self, delay: Duration) {
        self.lock().prepare_recording_delay = delay;
    }

    /// Change the reported thermal status without notifying
    pub fn set_thermal(&self, status: ThermalStatus) {
        self.lock().thermal = Some(status);
    }

    /// Report overheating the way the platform does: status first, then the change event
    pub fn overheat(&self) -> usize {
        self.set_thermal(ThermalStatus::Overheated);
        self.notify(DeviceNotification::ThermalStatusChanged)
    }

    /// Device calls in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.lock().open_devices.contains(device_id)
    }

    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.lock()
            .subscribers
            .get(device_id)
            .map(|s| s.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Settings of the most recent successful open
    pub fn opened_with(&self) -> Option<OpenSettings> {
        self.lock().opened_with.clone()
    }

    /// Output paths of finished recordings
    pub fn finalized(&self) -> Vec<PathBuf> {
        self.lock().finalized.clone()
    }
}

/// Device enumeration backed by fixed lists
pub struct MockProvider {
    devices: Vec<DeviceInfo>,
    profiles: Vec<Profile>,
    control: MockControl,
}

impl MockProvider {
    pub fn new(devices: Vec<DeviceInfo>, profiles: Vec<Profile>) -> Self {
        Self {
            devices,
            profiles,
            control: MockControl::default(),
        }
    }

    /// Single back-facing photo/video camera with a headset-like catalog
    pub fn hololens() -> Self {
        let devices = vec![DeviceInfo {
            id: "hololens-pv".to_string(),
            name: "QC Back: Photo/Video Camera".to_string(),
            panel: Panel::Back,
            supports_profiles: true,
        }];

        let d = CaptureDescription::new;
        let profiles = vec![
            Profile {
                id: "balanced".to_string(),
                photo_descriptions: vec![d(1920, 1080, 30.0), d(1280, 720, 30.0)],
                record_descriptions: vec![d(1920, 1080, 30.0), d(1280, 720, 30.0)],
            },
            Profile {
                id: "low-power".to_string(),
                photo_descriptions: vec![d(1280, 720, 15.0), d(640, 360, 15.0)],
                record_descriptions: vec![d(1280, 720, 15.0), d(960, 540, 30.0)],
            },
            Profile {
                id: "high-quality".to_string(),
                photo_descriptions: vec![d(3904, 2196, 30.0)],
                record_descriptions: vec![d(2272, 1278, 30.0)],
            },
        ];

        Self::new(devices, profiles)
    }

    pub fn control(&self) -> MockControl {
        self.control.clone()
    }
}

impl DeviceProvider for MockProvider {
    type Device = MockDevice;

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn profiles(&self, device_id: &str) -> Vec<Profile> {
        if self.devices.iter().any(|d| d.id == device_id) {
            self.profiles.clone()
        } else {
            Vec::new()
        }
    }

    async fn open(&self, settings: OpenSettings) -> Result<MockDevice, DeviceError> {
        let mut state = self.control.lock();
        if let Some(message) = state.fail_open.clone() {
            return Err(DeviceError::new(message));
        }
        if !state.open_devices.insert(settings.device_id.clone()) {
            return Err(DeviceError::new(format!(
                "Device {} is in use by another session",
                settings.device_id
            )));
        }
        state.opened_with = Some(settings.clone());
        info!(device = %settings.device_id, profile = %settings.profile.id, "Mock device opened");

        let (width, height) = settings
            .description
            .map(|d| (d.width, d.height))
            .unwrap_or(DEFAULT_FRAME);

        Ok(MockDevice {
            id: settings.device_id,
            width,
            height,
            control: self.control.clone(),
            closed: AtomicBool::new(false),
            sequence: AtomicU32::new(0),
            recording: Mutex::new(None),
        })
    }
}

/// Opened mock camera
pub struct MockDevice {
    id: String,
    width: u32,
    height: u32,
    control: MockControl,
    closed: AtomicBool,
    sequence: AtomicU32,
    recording: Mutex<Option<PathBuf>>,
}

impl MockDevice {
    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DeviceError::new("Device is closed"))
        } else {
            Ok(())
        }
    }

    fn recording(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.recording.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bottom-up BGRA test pattern that differs per frame
    fn render(&self, sequence: u32) -> FrameBuffer {
        let mut pixels = Vec::with_capacity(FrameBuffer::byte_len(self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                pixels.extend_from_slice(&[
                    (x % 256) as u8,
                    (y % 256) as u8,
                    (sequence % 256) as u8,
                    u8::MAX,
                ]);
            }
        }
        FrameBuffer::new(self.width, self.height, PixelLayout::Bgra8BottomUp, pixels)
            .unwrap_or_else(|_| FrameBuffer::zeroed(self.width, self.height, PixelLayout::Bgra8BottomUp))
    }
}

impl CameraDevice for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.control
            .lock()
            .subscribers
            .entry(self.id.clone())
            .or_default()
            .push(tx);
        rx
    }

    async fn prepare_photo(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.control.record("prepare_photo");
        Ok(())
    }

    async fn capture_photo(&self) -> Result<FrameBuffer, DeviceError> {
        self.ensure_open()?;
        self.control.record("capture_photo");
        let delay = self.control.lock().capture_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(self.render(sequence))
    }

    async fn finish_photo(&self) -> Result<(), DeviceError> {
        self.control.record("finish_photo");
        Ok(())
    }

    async fn prepare_recording(&self, output: &Path) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.control.record("prepare_recording");
        *self.recording() = Some(output.to_path_buf());
        let delay = self.control.lock().prepare_recording_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn start_recording(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.control.record("start_recording");
        let failure = self.control.lock().fail_start_recording.clone();
        match failure {
            Some(message) => {
                *self.recording() = None;
                Err(DeviceError::new(message))
            }
            None => Ok(()),
        }
    }

    async fn pause_recording(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.control.record("pause_recording");
        Ok(())
    }

    async fn resume_recording(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.control.record("resume_recording");
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), DeviceError> {
        self.control.record("stop_recording");
        Ok(())
    }

    async fn finish_recording(&self) -> Result<(), DeviceError> {
        self.control.record("finish_recording");
        let finished = self.recording().take();
        if let Some(path) = finished {
            debug!(path = %path.display(), "Mock recording finished");
            self.control.lock().finalized.push(path);
        }
        Ok(())
    }

    fn thermal_status(&self) -> ThermalStatus {
        self.control.lock().thermal.unwrap_or(ThermalStatus::Normal)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.control.lock();
        state.open_devices.remove(&self.id);
        state.subscribers.remove(&self.id);
        state.calls.push("close".to_string());
        debug!(device = %self.id, "Mock device closed");
    }
}
