//! Camera frame ownership.
//!
//! - `Frame`: one captured frame. Pixels are private, normalized to RGB at
//!   construction, and zeroized on drop. Carries the producer's release hook.
//! - `FrameView`: borrowed, read-only view handed to analyses.
//!
//! A frame is not `Clone`: there is exactly one owner of the release hook.
//!
//! ```compile_fail
//! use assist_vision::{Frame, PixelFormat, Rotation};
//!
//! let frame = Frame::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24, Rotation::Deg0, 0).unwrap();
//! let copy = frame.clone();
//! ```

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use zeroize::Zeroize;

use crate::error::PipelineError;
use crate::ingest::normalize_to_rgb;
pub use crate::ingest::PixelFormat;

/// Callback returning the frame's buffer to its producer.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique frame identifier, used to correlate results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Clockwise rotation needed to show the sensor image upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(PipelineError::InvalidFrame(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            ))
            .into()),
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

pub struct Frame {
    id: FrameId,
    /// Private sensor-orientation RGB pixels.
    image: RgbImage,
    /// Sensor dimensions.
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    upright: OnceLock<RgbImage>,
    release_hook: Mutex<Option<ReleaseHook>>,
}

// Explicitly NOT implementing Clone.

impl Frame {
    /// Wrap a captured buffer. The buffer length must match `format`,
    /// `width` and `height`.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: Rotation,
        timestamp_ms: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidFrame(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            ))
            .into());
        }
        let rgb = normalize_to_rgb(pixels, width, height, format)
            .map_err(|e| PipelineError::InvalidFrame(format!("{:#}", e)))?;
        let image = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self {
            id: FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)),
            image,
            width,
            height,
            rotation,
            timestamp_ms,
            upright: OnceLock::new(),
            release_hook: Mutex::new(None),
        })
    }

    /// Attach the producer's release callback.
    pub fn with_release_hook<F>(self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut slot) = self.release_hook.lock() {
            *slot = Some(Box::new(hook));
        }
        self
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Read-only view for analyses.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// Hand the buffer back to the producer.
    ///
    /// Returns true if this call fired the release hook. Callers sharing a
    /// frame across analyses must coordinate so only the last one releases;
    /// see `pipeline::FrameLease`.
    pub fn release(&self) -> bool {
        let hook = match self.release_hook.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match hook {
            Some(hook) => {
                hook();
                log::debug!("frame {} released", self.id);
                true
            }
            None => false,
        }
    }

    /// True once the release hook has fired (or if none was attached).
    pub fn is_released(&self) -> bool {
        match self.release_hook.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn upright_image(&self) -> &RgbImage {
        if self.rotation == Rotation::Deg0 {
            return &self.image;
        }
        self.upright.get_or_init(|| match self.rotation {
            Rotation::Deg90 => imageops::rotate90(&self.image),
            Rotation::Deg180 => imageops::rotate180(&self.image),
            Rotation::Deg270 => imageops::rotate270(&self.image),
            Rotation::Deg0 => self.image.clone(),
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let hook = match self.release_hook.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(hook) = hook {
            log::warn!("frame {} dropped without release; releasing now", self.id);
            hook();
        }
        // Zeroize pixel data on drop to limit exposure window.
        let pixels: &mut [u8] = &mut self.image;
        pixels.zeroize();
        if let Some(upright) = self.upright.get_mut() {
            let pixels: &mut [u8] = upright;
            pixels.zeroize();
        }
    }
}

/// Read-only view of a frame for analyses.
///
/// Dimensions and image are upright (rotation already applied); every box
/// produced from this view is in upright coordinates.
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn id(&self) -> FrameId {
        self.frame.id
    }

    pub fn width(&self) -> u32 {
        if self.frame.rotation.swaps_axes() {
            self.frame.height
        } else {
            self.frame.width
        }
    }

    pub fn height(&self) -> u32 {
        if self.frame.rotation.swaps_axes() {
            self.frame.width
        } else {
            self.frame.height
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.frame.rotation
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.frame.timestamp_ms
    }

    /// Upright RGB image, rotated once and cached on the frame.
    pub fn upright_image(&self) -> &'a RgbImage {
        self.frame.upright_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn rgb_frame(width: u32, height: u32, rotation: Rotation) -> Frame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        Frame::new(pixels, width, height, PixelFormat::Rgb24, rotation, 1_000).unwrap()
    }

    #[test]
    fn rotation_parses_multiples_of_ninety() -> Result<()> {
        assert_eq!(Rotation::from_degrees(90)?, Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90)?, Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(360)?, Rotation::Deg0);
        assert!(Rotation::from_degrees(45).is_err());
        Ok(())
    }

    #[test]
    fn view_reports_upright_geometry() {
        let frame = rgb_frame(4, 2, Rotation::Deg90);
        let view = frame.view();
        assert_eq!((view.width(), view.height()), (2, 4));
        assert_eq!(view.upright_image().dimensions(), (2, 4));
        // Clockwise: sensor bottom-left (0, 1) lands at upright top-left.
        assert_eq!(view.upright_image().get_pixel(0, 0), &Rgb([0, 1, 7]));
        assert_eq!(view.timestamp_ms(), 1_000);
    }

    #[test]
    fn unrotated_view_is_sensor_image() {
        let frame = rgb_frame(3, 2, Rotation::Deg0);
        assert_eq!(frame.view().upright_image().get_pixel(2, 1), &Rgb([2, 1, 7]));
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = Frame::new(vec![0u8; 5], 2, 2, PixelFormat::Rgb24, Rotation::Deg0, 0)
            .err()
            .expect("length mismatch");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidFrame(_))
        ));
    }

    #[test]
    fn release_fires_hook_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let frame = rgb_frame(2, 2, Rotation::Deg0).with_release_hook(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!frame.is_released());
        assert!(frame.release());
        assert!(!frame.release());
        drop(frame);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_unreleased_frame_still_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let frame = rgb_frame(2, 2, Rotation::Deg0).with_release_hook(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });
        drop(frame);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_ids_are_unique() {
        let a = rgb_frame(1, 1, Rotation::Deg0);
        let b = rgb_frame(1, 1, Rotation::Deg0);
        assert_ne!(a.id(), b.id());
    }
}
