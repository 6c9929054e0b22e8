use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::decode::{parse_labels, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_DETECTIONS};
use crate::detect::{DEFAULT_DETECTOR_INPUT, DEFAULT_EMBEDDER_INPUT};
use crate::error::PipelineError;
use crate::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use crate::nms::DEFAULT_IOU_THRESHOLD;

const DEFAULT_DB_PATH: &str = "gallery.db";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    db_path: Option<String>,
    models: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    recognition: Option<RecognitionConfigFile>,
    paths: Option<PathsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    face_embedder: Option<PathBuf>,
    object_detector: Option<PathBuf>,
    embedder_input: Option<u32>,
    detector_input: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    labels: Option<Vec<String>>,
    labels_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognitionConfigFile {
    similarity_threshold: Option<f32>,
    track_last_seen: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PathsConfigFile {
    face: Option<bool>,
    objects: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: String,
    pub models: ModelSettings,
    pub detection: DetectionSettings,
    pub recognition: RecognitionSettings,
    pub paths: PathSettings,
}

/// On-disk model files. Only used with the `backend-tract` feature.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub face_embedder: Option<PathBuf>,
    pub object_detector: Option<PathBuf>,
    pub embedder_input: u32,
    pub detector_input: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub labels: Vec<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub similarity_threshold: f32,
    pub track_last_seen: bool,
}

/// Which analyses run per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSettings {
    pub face: bool,
    pub objects: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            models: ModelSettings {
                face_embedder: None,
                object_detector: None,
                embedder_input: DEFAULT_EMBEDDER_INPUT,
                detector_input: DEFAULT_DETECTOR_INPUT,
            },
            detection: DetectionSettings {
                labels: Vec::new(),
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                iou_threshold: DEFAULT_IOU_THRESHOLD,
                max_detections: DEFAULT_MAX_DETECTIONS,
            },
            recognition: RecognitionSettings {
                similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
                track_last_seen: true,
            },
            paths: PathSettings {
                face: true,
                objects: true,
            },
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by `ASSIST_VISION_CONFIG` (if set), apply
    /// `ASSIST_VISION_*` overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ASSIST_VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let models = file.models.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let recognition = file.recognition.unwrap_or_default();
        let paths = file.paths.unwrap_or_default();

        let labels = match (detection.labels, detection.labels_path) {
            (Some(_), Some(_)) => {
                return Err(invalid("detection.labels and detection.labels_path are exclusive"))
            }
            (Some(labels), None) => labels,
            (None, Some(path)) => read_labels_file(&path)?,
            (None, None) => defaults.detection.labels,
        };

        Ok(Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            models: ModelSettings {
                face_embedder: models.face_embedder,
                object_detector: models.object_detector,
                embedder_input: models
                    .embedder_input
                    .unwrap_or(defaults.models.embedder_input),
                detector_input: models
                    .detector_input
                    .unwrap_or(defaults.models.detector_input),
            },
            detection: DetectionSettings {
                labels,
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(defaults.detection.confidence_threshold),
                iou_threshold: detection
                    .iou_threshold
                    .unwrap_or(defaults.detection.iou_threshold),
                max_detections: detection
                    .max_detections
                    .unwrap_or(defaults.detection.max_detections),
            },
            recognition: RecognitionSettings {
                similarity_threshold: recognition
                    .similarity_threshold
                    .unwrap_or(defaults.recognition.similarity_threshold),
                track_last_seen: recognition
                    .track_last_seen
                    .unwrap_or(defaults.recognition.track_last_seen),
            },
            paths: PathSettings {
                face: paths.face.unwrap_or(defaults.paths.face),
                objects: paths.objects.unwrap_or(defaults.paths.objects),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ASSIST_VISION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Some(value) = env_f32("ASSIST_VISION_CONFIDENCE_THRESHOLD")? {
            self.detection.confidence_threshold = value;
        }
        if let Some(value) = env_f32("ASSIST_VISION_IOU_THRESHOLD")? {
            self.detection.iou_threshold = value;
        }
        if let Some(value) = env_f32("ASSIST_VISION_SIMILARITY_THRESHOLD")? {
            self.recognition.similarity_threshold = value;
        }
        if let Ok(max) = std::env::var("ASSIST_VISION_MAX_DETECTIONS") {
            self.detection.max_detections = max.trim().parse().map_err(|_| {
                invalid("ASSIST_VISION_MAX_DETECTIONS must be a positive integer")
            })?;
        }
        if let Ok(labels) = std::env::var("ASSIST_VISION_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detection.labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.detection.confidence_threshold),
            ("iou_threshold", self.detection.iou_threshold),
            ("similarity_threshold", self.recognition.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.detection.max_detections == 0 {
            return Err(invalid("max_detections must be greater than zero"));
        }
        if self.models.embedder_input == 0 || self.models.detector_input == 0 {
            return Err(invalid("model input sizes must be greater than zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(invalid("db_path must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> anyhow::Error {
    PipelineError::InvalidConfig(message.to_string()).into()
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn read_labels_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read labels file {}: {}", path.display(), e))?;
    Ok(parse_labels(&raw))
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(&format!("{} must be a number", key))),
        _ => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
