use anyhow::Result;
use image::RgbImage;

use crate::detect::result::BoundingBox;

/// Length of the face embedding vector produced by the embedder.
pub const EMBEDDING_DIM: usize = 192;

/// Square input edge of the face embedding model.
pub const DEFAULT_EMBEDDER_INPUT: u32 = 112;

/// Square input edge of the object detection model.
pub const DEFAULT_DETECTOR_INPUT: u32 = 640;

/// Face detection capability.
///
/// Returns boxes only, in the coordinate space of the image it was given.
/// Implementations may be stateful; each instance is driven from a single
/// worker thread, never concurrently.
pub trait FaceDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Face embedding capability.
///
/// `embed` receives an image already resized to `input_size() x input_size()`
/// and returns a raw (not normalized) vector of [`EMBEDDING_DIM`] floats.
pub trait FaceEmbedder: Send {
    fn name(&self) -> &'static str;

    fn input_size(&self) -> u32 {
        DEFAULT_EMBEDDER_INPUT
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object detection capability.
///
/// `infer` receives an image resized to `input_size() x input_size()` and
/// returns the raw flat tensor, `N` records of `[x, y, w, h, conf, scores..]`
/// in model-input coordinates.
pub trait ObjectDetector: Send {
    fn name(&self) -> &'static str;

    fn input_size(&self) -> u32 {
        DEFAULT_DETECTOR_INPUT
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<f32>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>> {
        (**self).detect(image)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

impl<T: FaceEmbedder + ?Sized> FaceEmbedder for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>> {
        (**self).embed(face)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<f32>> {
        (**self).infer(image)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
