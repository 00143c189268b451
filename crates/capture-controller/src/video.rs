//! Video flow: timestamped recordings with pause and resume

use std::path::{Path, PathBuf};
use std::sync::Arc;

use camera_capture::session::SessionRequest;
use camera_capture::{
    CameraError, CaptureSession, DescriptorSet, DeviceProvider, StatusEvent, StatusSink,
};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::settings::CaptureSettings;
use crate::storage;
use crate::ControllerError;

/// Told the output path of every finalized recording, or `None` when a
/// recording failed to start
pub type RecordingListener = Arc<dyn Fn(Option<PathBuf>) + Send + Sync>;

/// Passes events on and reports finalized recordings to the listener,
/// whether they were stopped on request or by the device
struct ListenerSink {
    inner: Arc<dyn StatusSink>,
    listener: RecordingListener,
}

impl StatusSink for ListenerSink {
    fn emit(&self, event: StatusEvent) {
        let finalized = match &event {
            StatusEvent::RecordingFinalized {
                output_path,
                reason,
            } => {
                debug!(path = %output_path.display(), ?reason, "Publishing recording");
                Some(output_path.clone())
            }
            _ => None,
        };
        self.inner.emit(event);

        if let Some(path) = finalized {
            metrics::counter!("camera_recordings_finalized_total").increment(1);
            (self.listener)(Some(path));
        }
    }
}

pub struct VideoController<P: DeviceProvider> {
    session: CaptureSession<P>,
    output_dir: PathBuf,
    listener: RecordingListener,
}

impl<P: DeviceProvider> VideoController<P> {
    /// Open a record session with the configured mixed-reality effects
    pub async fn open(
        provider: Arc<P>,
        settings: &CaptureSettings,
        sink: Arc<dyn StatusSink>,
        listener: RecordingListener,
    ) -> Result<Self, ControllerError> {
        let session = CaptureSession::new(
            provider,
            Arc::new(ListenerSink {
                inner: sink,
                listener: listener.clone(),
            }),
        );
        let request = SessionRequest::new(
            settings.device.clone(),
            settings.video.target,
            DescriptorSet::Record,
        )
        .with_fallback(settings.fallback)
        .with_effects(settings.video.mixed_reality.clone());

        if let Err(e) = session.initialize(&request).await {
            session.cleanup().await;
            return Err(e.into());
        }

        info!(output_dir = %settings.video.output_dir.display(), "Video controller ready");
        Ok(Self {
            session,
            output_dir: settings.video.output_dir.clone(),
            listener,
        })
    }

    pub fn session(&self) -> &CaptureSession<P> {
        &self.session
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_recording()
    }

    /// Start recording into a new `<yyyyMMddHHmmss>_video.mp4`.
    ///
    /// The file is reserved before the device starts and removed again if
    /// the start fails.
    pub async fn start_recording(&self) -> Result<PathBuf, ControllerError> {
        let path = match storage::reserve_recording_path(&self.output_dir, Local::now()).await {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Could not reserve recording file");
                (self.listener)(None);
                return Err(e.into());
            }
        };

        match self.session.start(path.clone()).await {
            Ok(()) => Ok(path),
            Err(e) => {
                discard(&path).await;
                // the running recording is unaffected
                if !matches!(e, CameraError::AlreadyRecording) {
                    (self.listener)(None);
                }
                Err(e.into())
            }
        }
    }

    pub async fn pause(&self) -> Result<(), ControllerError> {
        Ok(self.session.pause().await?)
    }

    pub async fn resume(&self) -> Result<(), ControllerError> {
        Ok(self.session.resume().await?)
    }

    /// Stop and finalize the recording. The listener hears about it too.
    pub async fn stop_recording(&self) -> Result<Option<PathBuf>, ControllerError> {
        Ok(self.session.stop().await?)
    }

    /// Finalize any recording and release the camera
    pub async fn close(&self) {
        self.session.cleanup().await;
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove unused recording file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::device::DeviceNotification;
    use camera_capture::mock::MockProvider;
    use camera_capture::{SessionState, StopReason};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        controller: VideoController<MockProvider>,
        provider: Arc<MockProvider>,
        published: mpsc::UnboundedReceiver<Option<PathBuf>>,
        events: mpsc::UnboundedReceiver<StatusEvent>,
        dir: PathBuf,
    }

    async fn open() -> Harness {
        let dir = std::env::temp_dir().join(format!("capture-video-{}", uuid::Uuid::new_v4()));
        let mut settings = CaptureSettings::default();
        settings.video.output_dir = dir.clone();

        let provider = Arc::new(MockProvider::hololens());
        let (event_tx, events) = mpsc::unbounded_channel();
        let (published_tx, published) = mpsc::unbounded_channel();
        let listener: RecordingListener = Arc::new(move |path| {
            let _ = published_tx.send(path);
        });

        let controller =
            VideoController::open(provider.clone(), &settings, Arc::new(event_tx), listener)
                .await
                .unwrap();

        Harness {
            controller,
            provider,
            published,
            events,
            dir,
        }
    }

    async fn next_published(rx: &mut mpsc::UnboundedReceiver<Option<PathBuf>>) -> Option<PathBuf> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("listener was not called")
            .expect("listener dropped")
    }

    fn is_video_name(path: &Path) -> bool {
        let name = path.file_name().unwrap().to_string_lossy();
        name.len() == "yyyyMMddHHmmss_video.mp4".len()
            && name.ends_with("_video.mp4")
            && name[..14].chars().all(|c| c.is_ascii_digit())
    }

    #[tokio::test]
    async fn test_record_session_uses_effects() {
        let h = open().await;
        let opened = h.provider.control().opened_with().unwrap();
        assert_eq!(opened.descriptor_set, DescriptorSet::Record);
        assert_eq!(opened.profile.id, "low-power");
        assert_eq!(opened.effects, Some(CaptureSettings::default().video.mixed_reality));
        h.controller.close().await;
    }

    #[tokio::test]
    async fn test_start_stop_publishes_path() {
        let mut h = open().await;

        let path = h.controller.start_recording().await.unwrap();
        assert!(path.starts_with(&h.dir));
        assert!(is_video_name(&path), "{}", path.display());
        assert!(path.exists());

        h.controller.pause().await.unwrap();
        h.controller.resume().await.unwrap();

        let stopped = h.controller.stop_recording().await.unwrap();
        assert_eq!(stopped.as_ref(), Some(&path));
        assert_eq!(next_published(&mut h.published).await, Some(path.clone()));
        assert!(h.published.try_recv().is_err());
        assert_eq!(h.provider.control().finalized(), vec![path]);

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_failed_start_publishes_none_and_removes_file() {
        let mut h = open().await;
        h.provider.control().fail_start_recording("Encoder unavailable");

        let err = h.controller.start_recording().await.unwrap_err();
        assert!(matches!(err, ControllerError::Camera(CameraError::Device(_))));
        assert_eq!(next_published(&mut h.published).await, None);
        assert_eq!(h.controller.session().state(), SessionState::Ready);

        let leftovers = std::fs::read_dir(&h.dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_second_start_is_already_recording() {
        let mut h = open().await;
        h.controller.start_recording().await.unwrap();

        let err = h.controller.start_recording().await.unwrap_err();
        assert!(matches!(err, ControllerError::Camera(CameraError::AlreadyRecording)));
        assert!(err.is_recoverable());
        assert!(h.published.try_recv().is_err());
        assert_eq!(std::fs::read_dir(&h.dir).unwrap().count(), 1);

        let mut saw_busy = false;
        while let Ok(event) = h.events.try_recv() {
            saw_busy |= event == StatusEvent::AlreadyRecording;
        }
        assert!(saw_busy);

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_overheat_finalizes_and_publishes() {
        let mut h = open().await;
        let path = h.controller.start_recording().await.unwrap();

        h.provider.control().overheat();

        assert_eq!(next_published(&mut h.published).await, Some(path.clone()));
        assert!(!h.controller.is_recording());
        assert_eq!(h.controller.session().state(), SessionState::Ready);
        assert_eq!(h.controller.stop_recording().await.unwrap(), None);

        let mut reasons = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let StatusEvent::RecordingFinalized { reason, .. } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![StopReason::Overheat]);

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_record_limit_finalizes_and_publishes() {
        let mut h = open().await;
        let path = h.controller.start_recording().await.unwrap();

        h.provider.control().notify(DeviceNotification::RecordLimitExceeded);

        assert_eq!(next_published(&mut h.published).await, Some(path.clone()));
        assert_eq!(h.controller.session().state(), SessionState::Ready);
        assert!(path.exists());
        assert!(h.published.try_recv().is_err());

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_overheat_during_start_publishes_none() {
        let mut h = open().await;
        let control = h.provider.control();
        control.set_prepare_recording_delay(Duration::from_millis(100));

        let (started, _) = tokio::join!(h.controller.start_recording(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            control.overheat();
        });

        let err = started.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Camera(CameraError::RecordingInterrupted(StopReason::Overheat))
        ));
        assert_eq!(next_published(&mut h.published).await, None);
        assert!(h.published.try_recv().is_err());
        assert!(!h.controller.is_recording());

        let leftovers = std::fs::read_dir(&h.dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);

        h.controller.close().await;
        std::fs::remove_dir_all(&h.dir).ok();
    }

    #[tokio::test]
    async fn test_close_finalizes_active_recording() {
        let mut h = open().await;
        let path = h.controller.start_recording().await.unwrap();
        h.controller.pause().await.unwrap();

        h.controller.close().await;
        assert_eq!(next_published(&mut h.published).await, Some(path));
        assert_eq!(h.controller.session().state(), SessionState::Closed);
        assert!(!h.provider.control().is_open("hololens-pv"));
        std::fs::remove_dir_all(&h.dir).ok();
    }
}
