pub mod backend;
pub mod backends;
pub mod preprocess;
mod result;

pub use backend::{
    FaceDetector, FaceEmbedder, ObjectDetector, DEFAULT_DETECTOR_INPUT, DEFAULT_EMBEDDER_INPUT,
    EMBEDDING_DIM,
};
pub use result::{BoundingBox, Detection, ObjectDetectionResult, RecognitionResult, UNKNOWN_LABEL};
