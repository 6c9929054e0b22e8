use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::lease::{AnalysisTicket, FrameLease};
use super::sink::ResultSink;
use super::worker::ModelWorker;
use crate::config::{PathSettings, PipelineConfig};
use crate::decode::TensorDecoder;
use crate::detect::preprocess::{prepare_face, resize_square};
use crate::detect::{
    FaceDetector, FaceEmbedder, ObjectDetectionResult, ObjectDetector, RecognitionResult,
};
use crate::error::PipelineError;
use crate::frame::{Frame, FrameId, FrameView};
use crate::gallery::GalleryStore;
use crate::matcher::{FaceCount, FaceMatcher};
use crate::nms::non_max_suppression;

type Loader<T> = Box<dyn FnOnce() -> Result<T> + Send>;

/// Extra per-frame analysis (text reader, barcode scanner, ...).
///
/// Runs alongside the built-in paths and holds the frame like they do.
pub trait FrameConsumer: Send + Sync {
    fn name(&self) -> &str;
    fn consume(&self, frame: &FrameView<'_>) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsumerReport {
    pub name: String,
    pub error: Option<String>,
}

/// Final results of one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_id: u64,
    /// `None` when the face path is disabled.
    pub face: Option<RecognitionResult>,
    /// `None` when the object path is disabled.
    pub objects: Option<ObjectDetectionResult>,
    pub consumers: Vec<ConsumerReport>,
}

struct FacePath {
    detector: ModelWorker<Box<dyn FaceDetector>>,
    embedder: ModelWorker<Box<dyn FaceEmbedder>>,
    matcher: FaceMatcher,
    gallery: Arc<dyn GalleryStore>,
}

struct ObjectPath {
    detector: ModelWorker<Box<dyn ObjectDetector>>,
    decoder: TensorDecoder,
    iou_threshold: f32,
}

/// Per-frame driver: runs the face path, object path and extra consumers
/// concurrently and releases the frame once all of them are done.
pub struct Orchestrator {
    face: Option<FacePath>,
    objects: Option<ObjectPath>,
    consumers: Vec<Arc<dyn FrameConsumer>>,
    sink: Arc<dyn ResultSink>,
}

pub struct OrchestratorBuilder {
    paths: PathSettings,
    matcher: FaceMatcher,
    decoder: TensorDecoder,
    iou_threshold: f32,
    gallery: Option<Arc<dyn GalleryStore>>,
    sink: Option<Arc<dyn ResultSink>>,
    face_detector: Option<Loader<Box<dyn FaceDetector>>>,
    face_embedder: Option<Loader<Box<dyn FaceEmbedder>>>,
    object_detector: Option<Loader<Box<dyn ObjectDetector>>>,
    consumers: Vec<Arc<dyn FrameConsumer>>,
}

impl OrchestratorBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            paths: config.paths,
            matcher: FaceMatcher::new(config.recognition.similarity_threshold)
                .with_last_seen_tracking(config.recognition.track_last_seen),
            decoder: TensorDecoder::new(config.detection.labels.clone())
                .with_confidence_threshold(config.detection.confidence_threshold)
                .with_max_detections(config.detection.max_detections)
                .with_model_input_size(config.models.detector_input),
            iou_threshold: config.detection.iou_threshold,
            gallery: None,
            sink: None,
            face_detector: None,
            face_embedder: None,
            object_detector: None,
            consumers: Vec::new(),
        }
    }

    pub fn gallery(mut self, gallery: Arc<dyn GalleryStore>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Loader run on the face detector's worker thread.
    pub fn face_detector<F, D>(mut self, loader: F) -> Self
    where
        F: FnOnce() -> Result<D> + Send + 'static,
        D: FaceDetector + 'static,
    {
        self.face_detector = Some(Box::new(move || {
            let mut detector = loader()?;
            detector.warm_up()?;
            Ok(Box::new(detector) as Box<dyn FaceDetector>)
        }));
        self
    }

    pub fn face_embedder<F, E>(mut self, loader: F) -> Self
    where
        F: FnOnce() -> Result<E> + Send + 'static,
        E: FaceEmbedder + 'static,
    {
        self.face_embedder = Some(Box::new(move || {
            let mut embedder = loader()?;
            embedder.warm_up()?;
            Ok(Box::new(embedder) as Box<dyn FaceEmbedder>)
        }));
        self
    }

    pub fn object_detector<F, D>(mut self, loader: F) -> Self
    where
        F: FnOnce() -> Result<D> + Send + 'static,
        D: ObjectDetector + 'static,
    {
        self.object_detector = Some(Box::new(move || {
            let mut detector = loader()?;
            detector.warm_up()?;
            Ok(Box::new(detector) as Box<dyn ObjectDetector>)
        }));
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn FrameConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Spawn the model workers. Model loading happens on those threads; a
    /// model that fails to load only fails its own path.
    pub fn build(self) -> Result<Orchestrator> {
        let sink = self
            .sink
            .ok_or_else(|| missing("a result sink is required"))?;

        let face = if self.paths.face {
            let detector = self
                .face_detector
                .ok_or_else(|| missing("face path enabled without a face detector"))?;
            let embedder = self
                .face_embedder
                .ok_or_else(|| missing("face path enabled without a face embedder"))?;
            let gallery = self
                .gallery
                .ok_or_else(|| missing("face path enabled without a gallery"))?;
            Some(FacePath {
                detector: ModelWorker::spawn("face-detector", detector)?,
                embedder: ModelWorker::spawn("face-embedder", embedder)?,
                matcher: self.matcher,
                gallery,
            })
        } else {
            None
        };

        let objects = if self.paths.objects {
            let detector = self
                .object_detector
                .ok_or_else(|| missing("object path enabled without an object detector"))?;
            Some(ObjectPath {
                detector: ModelWorker::spawn("object-detector", detector)?,
                decoder: self.decoder,
                iou_threshold: self.iou_threshold,
            })
        } else {
            None
        };

        log::info!(
            "orchestrator ready: face={} objects={} consumers={}",
            face.is_some(),
            objects.is_some(),
            self.consumers.len()
        );
        Ok(Orchestrator {
            face,
            objects,
            consumers: self.consumers,
            sink,
        })
    }
}

fn missing(message: &str) -> anyhow::Error {
    PipelineError::InvalidConfig(message.to_string()).into()
}

/// Tag a backend failure with the model that raised it, keeping typed errors
/// intact.
fn model_error(model: &str, err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<PipelineError>().is_some() {
        return err;
    }
    PipelineError::Detection {
        model: model.to_string(),
        reason: format!("{:#}", err),
    }
    .into()
}

impl Orchestrator {
    pub fn builder(config: &PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Run every enabled analysis on `frame` and block until all finish.
    ///
    /// Each enabled path reports `Loading` then exactly one final result to
    /// the sink. Path failures become `Error` results. The frame is released
    /// exactly once, after the last analysis completes.
    pub fn process_frame(&self, frame: Frame) -> FrameReport {
        let root = FrameLease::open(frame);
        let frame_id = root.frame_id();
        log::debug!("frame {}: dispatching", frame_id);

        if self.face.is_some() {
            self.sink.on_face(frame_id, RecognitionResult::Loading);
        }
        if self.objects.is_some() {
            self.sink.on_objects(frame_id, ObjectDetectionResult::Loading);
        }

        thread::scope(|s| {
            let face = self.face.as_ref().map(|path| {
                let ticket = root.share();
                s.spawn(move || {
                    let result = match self.run_face(path, &ticket) {
                        Ok(result) => result,
                        Err(e) => {
                            log::warn!("frame {}: face path failed: {:#}", frame_id, e);
                            RecognitionResult::error(&e)
                        }
                    };
                    self.sink.on_face(frame_id, result.clone());
                    ticket.complete();
                    result
                })
            });

            let objects = self.objects.as_ref().map(|path| {
                let ticket = root.share();
                s.spawn(move || {
                    let result = match self.run_objects(path, &ticket) {
                        Ok(result) => result,
                        Err(e) => {
                            log::warn!("frame {}: object path failed: {:#}", frame_id, e);
                            ObjectDetectionResult::error(&e)
                        }
                    };
                    self.sink.on_objects(frame_id, result.clone());
                    ticket.complete();
                    result
                })
            });

            let consumers: Vec<_> = self
                .consumers
                .iter()
                .map(|consumer| {
                    let ticket = root.share();
                    let handle = s.spawn(move || {
                        let outcome = consumer.consume(&ticket.view());
                        ticket.complete();
                        outcome
                    });
                    (consumer.name().to_string(), handle)
                })
                .collect();

            // Every analysis holds its own ticket now.
            root.complete();

            let face = face.map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    let result = RecognitionResult::Error {
                        reason: "face analysis panicked".to_string(),
                    };
                    self.sink.on_face(frame_id, result.clone());
                    result
                })
            });
            let objects = objects.map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    let result = ObjectDetectionResult::Error {
                        reason: "object analysis panicked".to_string(),
                    };
                    self.sink.on_objects(frame_id, result.clone());
                    result
                })
            });
            let consumers = consumers
                .into_iter()
                .map(|(name, handle)| {
                    let error = match handle.join() {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(format!("{:#}", e)),
                        Err(_) => Some("consumer panicked".to_string()),
                    };
                    if let Some(error) = &error {
                        log::warn!("frame {}: consumer '{}' failed: {}", frame_id, name, error);
                    }
                    ConsumerReport { name, error }
                })
                .collect();

            FrameReport {
                frame_id: frame_id.0,
                face,
                objects,
                consumers,
            }
        })
    }

    fn run_face(&self, path: &FacePath, ticket: &AnalysisTicket) -> Result<RecognitionResult> {
        let job_ticket = ticket.share();
        let boxes = path
            .detector
            .submit(move |detector| {
                let view = job_ticket.view();
                detector
                    .detect(view.upright_image())
                    .map_err(|e| model_error(detector.name(), e))
            })
            .wait()?;

        let bbox = match FaceCount::classify(&boxes) {
            FaceCount::None => return Ok(RecognitionResult::NoFaceDetected),
            FaceCount::Multiple(count) => {
                return Ok(RecognitionResult::MultipleFacesDetected { count })
            }
            FaceCount::Single(bbox) => bbox,
        };

        let job_ticket = ticket.share();
        let raw = path
            .embedder
            .submit(move |embedder| {
                let view = job_ticket.view();
                let face = prepare_face(view.upright_image(), &bbox, embedder.input_size())?;
                embedder
                    .embed(&face)
                    .map_err(|e| model_error(embedder.name(), e))
            })
            .wait()?;

        path.matcher
            .match_embedding(&raw, bbox, path.gallery.as_ref(), crate::now_ms()?)
    }

    fn run_objects(
        &self,
        path: &ObjectPath,
        ticket: &AnalysisTicket,
    ) -> Result<ObjectDetectionResult> {
        let job_ticket = ticket.share();
        let (tensor, input_size, inference_time_ms) = path
            .detector
            .submit(move |detector| {
                let view = job_ticket.view();
                let input_size = detector.input_size();
                let input = resize_square(view.upright_image(), input_size);
                let started = Instant::now();
                let tensor = detector
                    .infer(&input)
                    .map_err(|e| model_error(detector.name(), e))?;
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok((tensor, input_size, elapsed))
            })
            .wait()?;

        let view = ticket.view();
        let decoded = path
            .decoder
            .decode_with_input(&tensor, input_size, view.width(), view.height())?;
        let detections = non_max_suppression(decoded, path.iou_threshold);
        log::debug!(
            "frame {}: {} objects in {} ms",
            ticket.frame_id(),
            detections.len(),
            inference_time_ms
        );
        if detections.is_empty() {
            return Ok(ObjectDetectionResult::NoObjectsDetected);
        }
        Ok(ObjectDetectionResult::Success {
            detections,
            inference_time_ms,
        })
    }

    pub fn face_enabled(&self) -> bool {
        self.face.is_some()
    }

    pub fn objects_enabled(&self) -> bool {
        self.objects.is_some()
    }

    /// Stop every model worker. Frames submitted afterwards fail with
    /// `Cancelled`.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(path) = &self.face {
            path.detector.shutdown()?;
            path.embedder.shutdown()?;
        }
        if let Some(path) = &self.objects {
            path.detector.shutdown()?;
        }
        Ok(())
    }
}

impl FrameReport {
    pub fn id(&self) -> FrameId {
        FrameId(self.frame_id)
    }
}
