//! Capture Controllers
//!
//! Composes profile negotiation, the capture session and frame conversion
//! into the two flows the application uses:
//! - Photo: capture a frame, convert it for display, run post-processing
//! - Video: start, pause, resume and stop recordings into timestamped files

pub mod photo;
pub mod settings;
pub mod storage;
pub mod video;

pub use photo::PhotoController;
pub use settings::{CaptureSettings, PhotoSettings, VideoSettings};
pub use storage::{FrameSink, ImageFileSink, LatestFrameSink};
pub use video::{RecordingListener, VideoController};

use camera_capture::{CameraError, FrameError};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Controller error types
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Conversion worker failed: {0}")]
    Worker(String),
}

impl ControllerError {
    /// The request was ignored; the controller can be used again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ControllerError::Camera(e) if e.is_recoverable())
    }
}

/// Initialize logging
pub fn init_logging(verbose: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
