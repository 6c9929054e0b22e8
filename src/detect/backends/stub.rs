use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{FaceDetector, FaceEmbedder, ObjectDetector, EMBEDDING_DIM};
use crate::detect::result::BoundingBox;

/// Stub face detector for tests and demos. Returns a fixed set of boxes.
#[derive(Clone, Debug, Default)]
pub struct StubFaceDetector {
    boxes: Vec<BoundingBox>,
    failure: Option<String>,
}

impl StubFaceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            failure: None,
        }
    }

    /// A detector whose every call fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            boxes: Vec::new(),
            failure: Some(reason.to_string()),
        }
    }
}

impl FaceDetector for StubFaceDetector {
    fn name(&self) -> &'static str {
        "stub-face"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>> {
        match &self.failure {
            Some(reason) => Err(anyhow!("{}", reason)),
            None => Ok(self.boxes.clone()),
        }
    }
}

/// Treats the whole image as one face. Used for pre-cropped portraits.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullFrameFaceDetector;

impl FaceDetector for FullFrameFaceDetector {
    fn name(&self) -> &'static str {
        "full-frame"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox::new(
            0,
            0,
            image.width() as i32,
            image.height() as i32,
        )])
    }
}

/// Deterministic embedder for tests and demos.
///
/// Splits the face into an 8x8 grid and emits the centred mean of each
/// channel per cell (8 * 8 * 3 = 192 values). Identical crops embed
/// identically; it has no notion of identity beyond that.
#[derive(Clone, Debug, Default)]
pub struct StubFaceEmbedder {
    fixed: Option<Vec<f32>>,
}

const GRID: u32 = 8;

impl StubFaceEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always return `embedding`, whatever the input.
    pub fn with_fixed(embedding: Vec<f32>) -> Self {
        Self {
            fixed: Some(embedding),
        }
    }
}

impl FaceEmbedder for StubFaceEmbedder {
    fn name(&self) -> &'static str {
        "stub-embedder"
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let (width, height) = face.dimensions();
        if width < GRID || height < GRID {
            return Err(anyhow!(
                "face crop {}x{} smaller than embedding grid",
                width,
                height
            ));
        }
        let cell_w = width / GRID;
        let cell_h = height / GRID;
        let mut out = Vec::with_capacity(EMBEDDING_DIM);
        for gy in 0..GRID {
            for gx in 0..GRID {
                let mut sums = [0f32; 3];
                for y in gy * cell_h..(gy + 1) * cell_h {
                    for x in gx * cell_w..(gx + 1) * cell_w {
                        let p = face.get_pixel(x, y);
                        for (sum, channel) in sums.iter_mut().zip(p.0) {
                            *sum += channel as f32;
                        }
                    }
                }
                let count = (cell_w * cell_h) as f32;
                out.extend(sums.iter().map(|sum| sum / count - 127.5));
            }
        }
        Ok(out)
    }
}

/// Stub object detector returning a fixed raw tensor.
#[derive(Clone, Debug, Default)]
pub struct StubObjectDetector {
    tensor: Vec<f32>,
    failure: Option<String>,
}

impl StubObjectDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tensor(tensor: Vec<f32>) -> Self {
        Self {
            tensor,
            failure: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            tensor: Vec::new(),
            failure: Some(reason.to_string()),
        }
    }
}

impl ObjectDetector for StubObjectDetector {
    fn name(&self) -> &'static str {
        "stub-objects"
    }

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<f32>> {
        match &self.failure {
            Some(reason) => Err(anyhow!("{}", reason)),
            None => Ok(self.tensor.clone()),
        }
    }
}
