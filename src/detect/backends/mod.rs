pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{FullFrameFaceDetector, StubFaceDetector, StubFaceEmbedder, StubObjectDetector};

#[cfg(feature = "backend-tract")]
pub use tract::{TractFaceEmbedder, TractObjectDetector};
