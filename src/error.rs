use thiserror::Error;

/// Typed failure kinds raised inside the recognition core.
///
/// Library functions return `anyhow::Result`; these are the errors worth
/// telling apart, recoverable with `err.downcast_ref::<PipelineError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("model '{model}' failed to load: {reason}")]
    ModelLoad { model: String, reason: String },
    #[error("detector '{model}' failed: {reason}")]
    Detection { model: String, reason: String },
    #[error("embedding has zero or non-finite norm")]
    DegenerateEmbedding,
    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },
    #[error("tensor length {len} is not a multiple of record stride {stride}")]
    TensorShape { len: usize, stride: usize },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("face box does not intersect the frame")]
    EmptyCrop,
    #[error("analysis cancelled before completion")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
