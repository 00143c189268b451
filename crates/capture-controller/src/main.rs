//! Camera capture sample
//!
//! Runs the photo and video flows against the scripted headset camera.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camera_capture::mock::MockProvider;
use camera_capture::{StatusSink, TracingSink};
use capture_controller::{
    init_logging, CaptureSettings, ControllerError, FrameSink, ImageFileSink, PhotoController,
    RecordingListener, VideoController,
};
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Photo,
    Video,
    Both,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// TOML settings file; `CAMERA__*` environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture flow to run
    #[arg(long, value_enum, default_value_t = Mode::Both)]
    mode: Mode,

    /// Photos to take
    #[arg(long, default_value_t = 3)]
    photos: u32,

    /// Recording length in milliseconds
    #[arg(long, default_value_t = 1500)]
    record_ms: u64,

    /// Debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    init_logging(args.verbose)?;

    info!("=== Camera Capture Sample v{} ===", env!("CARGO_PKG_VERSION"));

    let settings = CaptureSettings::load(args.config.as_deref())?;
    let provider = Arc::new(MockProvider::hololens());
    let sink: Arc<dyn StatusSink> = Arc::new(TracingSink);

    if matches!(args.mode, Mode::Photo | Mode::Both) {
        run_photos(provider.clone(), &settings, sink.clone(), args.photos).await?;
    }
    if matches!(args.mode, Mode::Video | Mode::Both) {
        let length = Duration::from_millis(args.record_ms);
        run_recording(provider, &settings, sink, length).await?;
    }

    info!("Sample finished");
    Ok(())
}

async fn run_photos(
    provider: Arc<MockProvider>,
    settings: &CaptureSettings,
    sink: Arc<dyn StatusSink>,
    count: u32,
) -> Result<(), ControllerError> {
    let controller = PhotoController::open(provider, settings, sink).await?;
    let mut files = ImageFileSink::new(&settings.photo.output_dir);

    let mut result = Ok(());
    for n in 1..=count {
        match controller.take_photo().await {
            Ok(frame) => {
                if let Err(e) = files.present(frame) {
                    result = Err(e);
                    break;
                }
            }
            Err(e) if e.is_recoverable() => warn!(photo = n, error = %e, "Photo skipped"),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    controller.close().await;
    result
}

async fn run_recording(
    provider: Arc<MockProvider>,
    settings: &CaptureSettings,
    sink: Arc<dyn StatusSink>,
    length: Duration,
) -> Result<(), ControllerError> {
    let (published_tx, mut published) = mpsc::unbounded_channel();
    let listener: RecordingListener = Arc::new(move |path| {
        let _ = published_tx.send(path);
    });

    let controller = VideoController::open(provider, settings, sink, listener).await?;

    let result = async {
        controller.start_recording().await?;
        tokio::time::sleep(length / 2).await;
        controller.pause().await?;
        controller.resume().await?;
        tokio::time::sleep(length / 2).await;
        controller.stop_recording().await
    }
    .await;

    controller.close().await;

    while let Ok(path) = published.try_recv() {
        match path {
            Some(path) => info!(path = %path.display(), "Video captured"),
            None => error!("Video capture failed"),
        }
    }

    result.map(|_| ())
}
