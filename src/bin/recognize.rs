//! recognize - gallery management and one-shot recognition on still images
//!
//! Faces are expected pre-cropped (the whole image is treated as one face).
//! Embedding and object models come from the config file when the crate is
//! built with `backend-tract`; otherwise a deterministic stub embedder is used
//! and object detection is unavailable.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use assist_vision::detect::backends::{FullFrameFaceDetector, StubFaceEmbedder};
use assist_vision::detect::preprocess::resize_square;
use assist_vision::matcher::enroll_from_image;
use assist_vision::{
    non_max_suppression, now_ms, FaceEmbedder, FaceMatcher, FileConfig, FileSource,
    GalleryStore, ObjectDetector, PipelineConfig, Rotation, SqliteGalleryStore, TensorDecoder,
};

#[derive(Parser, Debug)]
#[command(name = "recognize", about = "Face gallery and object detection on still images")]
struct Args {
    /// Gallery database (overrides config)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enroll a pre-cropped face image under a name
    Enroll {
        #[arg(long)]
        name: String,
        #[arg(long)]
        image: String,
        #[arg(long, default_value_t = 0)]
        rotation: i32,
    },

    /// List enrolled identities
    List,

    /// Delete every entry with the given name
    Delete {
        #[arg(long)]
        name: String,
    },

    /// Delete every enrolled identity
    Clear,

    /// Match a pre-cropped face image against the gallery
    Match {
        #[arg(long)]
        image: String,
        #[arg(long, default_value_t = 0)]
        rotation: i32,
    },

    /// Run object detection on an image
    Detect {
        #[arg(long)]
        image: String,
        #[arg(long, default_value_t = 0)]
        rotation: i32,
    },
}

#[derive(Serialize)]
struct ListedEntry {
    id: Option<i64>,
    name: String,
    tracking_id: Option<i64>,
    last_seen_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::load()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    match args.command {
        Command::Enroll {
            name,
            image,
            rotation,
        } => {
            let gallery = SqliteGalleryStore::open(&config.db_path)?;
            let frame = load_frame(&image, rotation)?;
            let mut embedder = face_embedder(&config)?;
            let id = enroll_from_image(
                frame.view().upright_image(),
                &name,
                &mut FullFrameFaceDetector,
                embedder.as_mut(),
                &gallery,
                now_ms()?,
            )?;
            frame.release();
            print_json(&serde_json::json!({ "enrolled": name.trim(), "id": id }))
        }

        Command::List => {
            let gallery = SqliteGalleryStore::open(&config.db_path)?;
            let entries: Vec<ListedEntry> = gallery
                .get_all()?
                .into_iter()
                .map(|entry| ListedEntry {
                    id: entry.id,
                    name: entry.name,
                    tracking_id: entry.tracking_id,
                    last_seen_ms: entry.last_seen_ms,
                })
                .collect();
            print_json(&entries)
        }

        Command::Delete { name } => {
            let gallery = SqliteGalleryStore::open(&config.db_path)?;
            let removed = gallery.delete_by_name(&name)?;
            if removed == 0 {
                log::warn!("no gallery entry named '{}'", name);
            }
            print_json(&serde_json::json!({ "deleted": removed }))
        }

        Command::Clear => {
            let gallery = SqliteGalleryStore::open(&config.db_path)?;
            let removed = gallery.delete_all()?;
            print_json(&serde_json::json!({ "deleted": removed }))
        }

        Command::Match { image, rotation } => {
            let gallery = SqliteGalleryStore::open(&config.db_path)?;
            let frame = load_frame(&image, rotation)?;
            let mut embedder = face_embedder(&config)?;
            let matcher = FaceMatcher::new(config.recognition.similarity_threshold)
                .with_last_seen_tracking(config.recognition.track_last_seen);
            let result = matcher.recognize(
                frame.view().upright_image(),
                &mut FullFrameFaceDetector,
                embedder.as_mut(),
                &gallery,
                now_ms()?,
            )?;
            frame.release();
            print_json(&result)
        }

        Command::Detect { image, rotation } => {
            let frame = load_frame(&image, rotation)?;
            let mut detector = object_detector(&config)?;
            let view = frame.view();
            let input_size = detector.input_size();
            let tensor = detector.infer(&resize_square(view.upright_image(), input_size))?;
            let decoder = TensorDecoder::new(config.detection.labels.clone())
                .with_confidence_threshold(config.detection.confidence_threshold)
                .with_max_detections(config.detection.max_detections);
            let decoded =
                decoder.decode_with_input(&tensor, input_size, view.width(), view.height())?;
            let detections = non_max_suppression(decoded, config.detection.iou_threshold);
            frame.release();
            print_json(&detections)
        }
    }
}

fn load_frame(path: &str, rotation: i32) -> Result<assist_vision::Frame> {
    let mut source = FileSource::new(FileConfig {
        path: path.to_string(),
        rotation: Rotation::from_degrees(rotation)?,
        ..FileConfig::default()
    })?;
    source.next_frame()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn face_embedder(config: &PipelineConfig) -> Result<Box<dyn FaceEmbedder>> {
    use assist_vision::detect::backends::TractFaceEmbedder;

    match &config.models.face_embedder {
        Some(path) => Ok(Box::new(TractFaceEmbedder::new(
            path,
            config.models.embedder_input,
        )?)),
        None => {
            log::warn!("models.face_embedder not set; using stub embedder");
            Ok(Box::new(StubFaceEmbedder::new()))
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn face_embedder(config: &PipelineConfig) -> Result<Box<dyn FaceEmbedder>> {
    if config.models.face_embedder.is_some() {
        log::warn!("built without backend-tract; ignoring models.face_embedder");
    }
    Ok(Box::new(StubFaceEmbedder::new()))
}

#[cfg(feature = "backend-tract")]
fn object_detector(config: &PipelineConfig) -> Result<Box<dyn ObjectDetector>> {
    use assist_vision::detect::backends::TractObjectDetector;

    let path = config
        .models
        .object_detector
        .as_ref()
        .ok_or_else(|| anyhow!("models.object_detector must be set for detection"))?;
    Ok(Box::new(TractObjectDetector::new(
        path,
        config.models.detector_input,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn object_detector(_config: &PipelineConfig) -> Result<Box<dyn ObjectDetector>> {
    Err(anyhow!(
        "object detection requires building with --features backend-tract"
    ))
}
