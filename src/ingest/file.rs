//! Local frame source.
//!
//! `FileSource` produces frames from a local still image (repeated on every
//! call, as a camera pointed at a fixed scene would) or from a synthetic
//! `stub://` stream. Remote URL schemes are rejected.

use anyhow::{anyhow, Context, Result};

use super::PixelFormat;
use crate::frame::{Frame, Rotation};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local image path, or `stub://<name>` for synthetic frames.
    pub path: String,
    /// Rotation reported with every frame.
    pub rotation: Rotation,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            rotation: Rotation::Deg0,
            width: 640,
            height: 480,
        }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Image(ImageSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::new(config))
        } else {
            FileBackend::Image(ImageSource::open(config)?)
        };
        Ok(Self { backend })
    }

    /// Capture the next frame.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Image(source) => source.next_frame(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => FileStats {
                frames_captured: source.frame_count,
                path: source.config.path.clone(),
            },
            FileBackend::Image(source) => FileStats {
                frames_captured: source.frame_count,
                path: source.config.path.clone(),
            },
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

struct ImageSource {
    config: FileConfig,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    frame_count: u64,
}

impl ImageSource {
    fn open(config: FileConfig) -> Result<Self> {
        let image = image::open(&config.path)
            .with_context(|| format!("failed to decode image {}", config.path))?
            .into_rgb8();
        log::info!(
            "FileSource: loaded {} ({}x{})",
            config.path,
            image.width(),
            image.height()
        );
        Ok(Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
            config,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        Frame::new(
            self.pixels.clone(),
            self.width,
            self.height,
            PixelFormat::Rgb24,
            self.config.rotation,
            crate::now_ms()?,
        )
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: FileConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    fn new(config: FileConfig) -> Self {
        log::info!("FileSource: connected to {} (synthetic)", config.path);
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
            self.config.rotation,
            crate::now_ms()?,
        )
    }

    /// Mostly static background whose pattern shifts every 50 frames.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        for path in ["", "http://camera/frame.jpg", "rtsp://cam"] {
            let config = FileConfig {
                path: path.to_string(),
                ..FileConfig::default()
            };
            assert!(FileSource::new(config).is_err(), "{path} accepted");
        }
    }

    #[test]
    fn synthetic_source_produces_sized_frames() -> Result<()> {
        let mut source = FileSource::new(FileConfig {
            path: "stub://test".to_string(),
            rotation: Rotation::Deg90,
            width: 32,
            height: 16,
        })?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (32, 16));
        assert_eq!(frame.view().width(), 16);
        source.next_frame()?;
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn image_source_repeats_the_still() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.png");
        image::RgbImage::from_pixel(5, 4, image::Rgb([9, 8, 7])).save(&path)?;

        let mut source = FileSource::new(FileConfig {
            path: path.display().to_string(),
            ..FileConfig::default()
        })?;
        let a = source.next_frame()?;
        let b = source.next_frame()?;
        assert_eq!((a.width, a.height), (5, 4));
        assert_eq!(b.view().upright_image().get_pixel(4, 3), &image::Rgb([9, 8, 7]));
        assert_ne!(a.id(), b.id());
        Ok(())
    }
}
