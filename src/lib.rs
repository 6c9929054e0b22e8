//! Assist Vision
//!
//! On-device visual recognition core for an assistive camera application.
//! Live frames feed two independent analyses:
//!
//! 1. **Face recognition**: detect, require exactly one face, crop, embed,
//!    and match against a stored gallery by cosine similarity.
//! 2. **Object detection**: run the detector, decode its flat output tensor,
//!    threshold, and suppress overlapping boxes.
//!
//! # Module Structure
//!
//! - `frame`, `ingest`: frame ownership (Frame, FrameView) and producers
//! - `detect`: model traits, stub and ONNX backends, result types
//! - `decode`, `nms`, `embedding`, `matcher`: the numeric core
//! - `gallery`: enrolled identities (SQLite or in-memory)
//! - `pipeline`: model workers, frame leases, orchestration, backpressure
//! - `config`: file + environment configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod decode;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod frame;
pub mod gallery;
pub mod ingest;
pub mod matcher;
pub mod nms;
pub mod pipeline;

pub use config::PipelineConfig;
pub use decode::TensorDecoder;
pub use detect::{
    BoundingBox, Detection, FaceDetector, FaceEmbedder, ObjectDetectionResult, ObjectDetector,
    RecognitionResult, UNKNOWN_LABEL,
};
pub use error::PipelineError;
pub use frame::{Frame, FrameId, FrameView, PixelFormat, Rotation};
pub use gallery::{GalleryEntry, GalleryStore, InMemoryGalleryStore, SqliteGalleryStore};
pub use ingest::{FileConfig, FileSource};
pub use matcher::{enroll, FaceCount, FaceMatcher};
pub use nms::non_max_suppression;
pub use pipeline::{
    ChannelSink, CollectingSink, FrameConsumer, FrameReport, Offer, Orchestrator,
    RecognitionPipeline, ResultSink,
};

/// URI for a private shared-cache in-memory SQLite database.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:assist_vision_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(u64::try_from(elapsed.as_millis())?)
}
