//! Output files and frame sinks

use std::io;
use std::path::{Path, PathBuf};

use camera_capture::{FrameBuffer, FrameError, PixelLayout};
use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::ControllerError;

/// Timestamp format shared by photo and video file names
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Upper bound on ` (n)` suffixes tried before giving up
const MAX_UNIQUE_ATTEMPTS: u32 = 10_000;

/// `<yyyyMMddHHmmss>_video.mp4`
pub fn recording_file_name(timestamp: DateTime<Local>) -> String {
    format!("{}_video.mp4", timestamp.format(TIMESTAMP_FORMAT))
}

/// Atomically create an empty file named `file_name` in `dir`.
///
/// An existing name gets a ` (2)`, ` (3)`, ... suffix before the extension.
pub async fn reserve_unique(dir: &Path, file_name: &str) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name.extension().map(|e| e.to_string_lossy().into_owned());

    for attempt in 1..=MAX_UNIQUE_ATTEMPTS {
        let candidate = if attempt == 1 {
            dir.join(file_name)
        } else {
            match &extension {
                Some(ext) => dir.join(format!("{stem} ({attempt}).{ext}")),
                None => dir.join(format!("{stem} ({attempt})")),
            }
        };

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => {
                debug!(path = %candidate.display(), "Reserved output file");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("No free file name for {file_name} in {}", dir.display()),
    ))
}

/// Reserve the output file for a recording started at `timestamp`
pub async fn reserve_recording_path(dir: &Path, timestamp: DateTime<Local>) -> io::Result<PathBuf> {
    reserve_unique(dir, &recording_file_name(timestamp)).await
}

/// Consumer of converted frames
pub trait FrameSink: Send {
    fn present(&mut self, frame: FrameBuffer) -> Result<(), ControllerError>;
}

/// Keeps the most recent frame, like a display texture.
///
/// A failed capture never reaches the sink, so the prior frame stays shown.
#[derive(Debug, Default)]
pub struct LatestFrameSink {
    frame: Option<FrameBuffer>,
}

impl LatestFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.frame.as_ref()
    }
}

impl FrameSink for LatestFrameSink {
    fn present(&mut self, frame: FrameBuffer) -> Result<(), ControllerError> {
        self.frame = Some(frame);
        Ok(())
    }
}

/// Writes each frame as `<yyyyMMddHHmmss>_photo_<seq>.png`
#[derive(Debug)]
pub struct ImageFileSink {
    dir: PathBuf,
    sequence: u32,
    last_path: Option<PathBuf>,
}

impl ImageFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: 0,
            last_path: None,
        }
    }

    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }
}

impl FrameSink for ImageFileSink {
    fn present(&mut self, frame: FrameBuffer) -> Result<(), ControllerError> {
        if frame.layout() != PixelLayout::Rgba8TopDown {
            return Err(FrameError::UnsupportedFormat(frame.layout()).into());
        }

        std::fs::create_dir_all(&self.dir)?;
        self.sequence += 1;
        let path = self.dir.join(format!(
            "{}_photo_{:03}.png",
            Local::now().format(TIMESTAMP_FORMAT),
            self.sequence
        ));

        let (width, height) = (frame.width(), frame.height());
        let expected = FrameBuffer::byte_len(width, height);
        let actual = frame.pixels().len();
        let image = image::RgbaImage::from_raw(width, height, frame.into_pixels())
            .ok_or(FrameError::SizeMismatch { expected, actual })?;
        image.save(&path)?;

        info!(path = %path.display(), width, height, "Photo saved");
        self.last_path = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("capture-storage-{}", uuid::Uuid::new_v4()))
    }

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_recording_file_name() {
        assert_eq!(recording_file_name(timestamp()), "20240305140709_video.mp4");
    }

    #[tokio::test]
    async fn test_reserve_creates_directory_and_suffixes_collisions() {
        let dir = temp_dir().join("videos");

        let first = reserve_recording_path(&dir, timestamp()).await.unwrap();
        let second = reserve_recording_path(&dir, timestamp()).await.unwrap();
        let third = reserve_recording_path(&dir, timestamp()).await.unwrap();

        assert_eq!(first, dir.join("20240305140709_video.mp4"));
        assert_eq!(second, dir.join("20240305140709_video (2).mp4"));
        assert_eq!(third, dir.join("20240305140709_video (3).mp4"));
        assert!(first.exists() && second.exists() && third.exists());

        std::fs::remove_dir_all(dir.parent().unwrap()).ok();
    }

    #[test]
    fn test_latest_frame_sink_keeps_most_recent() {
        let mut sink = LatestFrameSink::new();
        assert!(sink.frame().is_none());
        sink.present(FrameBuffer::zeroed(2, 2, PixelLayout::Rgba8TopDown))
            .unwrap();
        sink.present(FrameBuffer::zeroed(4, 1, PixelLayout::Rgba8TopDown))
            .unwrap();
        assert_eq!(sink.frame().map(|f| f.width()), Some(4));
    }

    #[test]
    fn test_image_sink_writes_png() {
        let dir = temp_dir();
        let mut sink = ImageFileSink::new(&dir);
        let pixels = vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 10, 20, 30, 40,
        ];
        sink.present(FrameBuffer::new(2, 2, PixelLayout::Rgba8TopDown, pixels).unwrap())
            .unwrap();

        let path = sink.last_path().unwrap().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_photo_001.png"), "{name}");
        assert_eq!(name.len(), "yyyyMMddHHmmss_photo_001.png".len());

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [10, 20, 30, 40]);
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0, 255]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_image_sink_rejects_raw_frames() {
        let dir = temp_dir();
        let mut sink = ImageFileSink::new(&dir);
        let err = sink
            .present(FrameBuffer::zeroed(2, 2, PixelLayout::Bgra8BottomUp))
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Frame(FrameError::UnsupportedFormat(PixelLayout::Bgra8BottomUp))
        ));
        assert!(sink.last_path().is_none());
        assert!(!dir.exists());
    }
}
