#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{FaceEmbedder, ObjectDetector, EMBEDDING_DIM};
use crate::error::PipelineError;

type Plan = TypedRunnableModel<TypedModel>;

/// Load an ONNX model with a fixed `1 x 3 x size x size` f32 input.
fn load_square_model(model_path: &Path, size: u32) -> Result<Plan> {
    let plan = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, size as usize, size as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")?;
    Ok(plan)
}

/// NCHW tensor scaled to `[0, 1]`.
fn build_input(image: &RgbImage, size: u32) -> Result<Tensor> {
    if image.width() != size || image.height() != size {
        return Err(anyhow!(
            "image size {}x{} does not match model input {}x{}",
            image.width(),
            image.height(),
            size,
            size
        ));
    }
    let size = size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
        image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
    });
    Ok(input.into_tensor())
}

fn first_output(outputs: TVec<TValue>) -> Result<Vec<f32>> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let values = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    Ok(values.iter().copied().collect())
}

fn model_load_error(model: &str, err: anyhow::Error) -> anyhow::Error {
    PipelineError::ModelLoad {
        model: model.to_string(),
        reason: format!("{:#}", err),
    }
    .into()
}

/// Object detector backed by a local ONNX model.
///
/// The model must emit a single `N x (5 + C)` f32 tensor (any leading batch
/// dimension is flattened away).
pub struct TractObjectDetector {
    plan: Plan,
    input_size: u32,
}

impl TractObjectDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let plan = load_square_model(model_path.as_ref(), input_size)
            .map_err(|e| model_load_error("tract-objects", e))?;
        Ok(Self { plan, input_size })
    }
}

impl ObjectDetector for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract-objects"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<f32>> {
        let input = build_input(image, self.input_size)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        first_output(outputs)
    }
}

/// Face embedder backed by a local ONNX model producing 192 floats.
pub struct TractFaceEmbedder {
    plan: Plan,
    input_size: u32,
}

impl TractFaceEmbedder {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let plan = load_square_model(model_path.as_ref(), input_size)
            .map_err(|e| model_load_error("tract-embedder", e))?;
        Ok(Self { plan, input_size })
    }
}

impl FaceEmbedder for TractFaceEmbedder {
    fn name(&self) -> &'static str {
        "tract-embedder"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Vec<f32>> {
        let input = build_input(face, self.input_size)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX embedding failed")?;
        let embedding = first_output(outputs)?;
        if embedding.len() != EMBEDDING_DIM {
            return Err(PipelineError::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(embedding)
    }
}
