//! Frame producers.
//!
//! Every source yields owned `Frame`s whose pixels are normalized to RGB at
//! construction. Live camera integrations push frames into
//! `pipeline::RecognitionPipeline::offer` directly; the sources here cover
//! local still images and a synthetic `stub://` stream.
//!
//! Sources MUST NOT store frames to disk or retain them after handoff.

pub mod file;
mod normalize;

pub use file::{FileConfig, FileSource, FileStats};
pub use normalize::PixelFormat;
pub(crate) use normalize::normalize_to_rgb;
