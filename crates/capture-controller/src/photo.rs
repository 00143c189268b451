//! Photo flow: capture, convert for display, post-process

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use camera_capture::session::SessionRequest;
use camera_capture::{
    convert, CameraError, CaptureSession, DescriptorSet, DeviceProvider, FrameBuffer,
    FrameProcessor, Grayscale, StatusEvent, StatusSink,
};
use tracing::{debug, info, warn};

use crate::settings::CaptureSettings;
use crate::storage::FrameSink;
use crate::ControllerError;

/// Clears the in-flight flag however the capture ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PhotoController<P: DeviceProvider> {
    session: CaptureSession<P>,
    sink: Arc<dyn StatusSink>,
    mirror_horizontally: bool,
    processors: Vec<Arc<dyn FrameProcessor>>,
    /// Covers the raw capture and the conversion after it
    in_flight: AtomicBool,
}

impl<P: DeviceProvider> PhotoController<P> {
    /// Open a photo session and prepare low-latency capture
    pub async fn open(
        provider: Arc<P>,
        settings: &CaptureSettings,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self, ControllerError> {
        let session = CaptureSession::new(provider, sink.clone());
        let request = SessionRequest::new(
            settings.device.clone(),
            settings.photo.target,
            DescriptorSet::Photo,
        )
        .with_fallback(settings.fallback);

        let opened = async {
            session.initialize(&request).await?;
            session.prepare().await
        }
        .await;
        if let Err(e) = opened {
            session.cleanup().await;
            return Err(e.into());
        }

        let mut processors: Vec<Arc<dyn FrameProcessor>> = Vec::new();
        if settings.photo.grayscale {
            processors.push(Arc::new(Grayscale));
        }

        info!(
            mirror = settings.photo.mirror_horizontally,
            processors = processors.len(),
            "Photo controller ready"
        );

        Ok(Self {
            session,
            sink,
            mirror_horizontally: settings.photo.mirror_horizontally,
            processors,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Append a post-processing stage, run after conversion
    pub fn with_processor(mut self, processor: Arc<dyn FrameProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn session(&self) -> &CaptureSession<P> {
        &self.session
    }

    pub fn is_capturing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Capture one photo and return it as top-down RGBA.
    ///
    /// Fails fast with `CaptureBusy` while another photo is in flight.
    pub async fn take_photo(&self) -> Result<FrameBuffer, ControllerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Photo capture already in progress");
            self.sink.emit(StatusEvent::CaptureBusy);
            return Err(CameraError::CaptureBusy.into());
        }
        let _guard = InFlight(&self.in_flight);

        let result = self.capture_and_convert().await;
        match &result {
            Ok(frame) => {
                metrics::counter!("camera_photos_captured_total").increment(1);
                info!(width = frame.width(), height = frame.height(), "Photo ready");
            }
            Err(e) => {
                metrics::counter!("camera_photo_failures_total").increment(1);
                warn!(error = %e, "Photo capture failed");
            }
        }
        result
    }

    /// Capture one photo and hand it to `sink`. On failure the sink is untouched.
    pub async fn take_photo_into(&self, sink: &mut impl FrameSink) -> Result<(), ControllerError> {
        let frame = self.take_photo().await?;
        sink.present(frame)
    }

    async fn capture_and_convert(&self) -> Result<FrameBuffer, ControllerError> {
        let raw = self.session.capture().await?;

        let mirror = self.mirror_horizontally;
        let processors = self.processors.clone();
        let started = Instant::now();

        let frame = tokio::task::spawn_blocking(move || {
            let mut frame = convert(raw, mirror)?;
            for processor in &processors {
                processor.process(&mut frame)?;
                debug!(processor = processor.name(), "Frame processed");
            }
            Ok::<_, camera_capture::FrameError>(frame)
        })
        .await
        .map_err(|e| ControllerError::Worker(e.to_string()))??;

        metrics::histogram!("camera_frame_convert_seconds").record(started.elapsed().as_secs_f64());
        Ok(frame)
    }

    /// Release the camera
    pub async fn close(&self) {
        self.session.cleanup().await;
    }
}
