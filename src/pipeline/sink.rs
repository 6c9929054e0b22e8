use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::detect::{ObjectDetectionResult, RecognitionResult};
use crate::frame::FrameId;

/// Receives per-path results as they are produced.
///
/// Each enabled path reports `Loading` first, then exactly one final result
/// per frame. Calls may arrive from several threads.
pub trait ResultSink: Send + Sync {
    fn on_face(&self, frame: FrameId, result: RecognitionResult);
    fn on_objects(&self, frame: FrameId, result: ObjectDetectionResult);
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum PipelineEvent {
    Face {
        frame: u64,
        result: RecognitionResult,
    },
    Objects {
        frame: u64,
        result: ObjectDetectionResult,
    },
}

impl PipelineEvent {
    pub fn frame_id(&self) -> FrameId {
        match self {
            PipelineEvent::Face { frame, .. } | PipelineEvent::Objects { frame, .. } => {
                FrameId(*frame)
            }
        }
    }

    pub fn is_final(&self) -> bool {
        match self {
            PipelineEvent::Face { result, .. } => result.is_final(),
            PipelineEvent::Objects { result, .. } => result.is_final(),
        }
    }
}

/// Forwards every result over an mpsc channel.
pub struct ChannelSink {
    tx: Mutex<Sender<PipelineEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, event: PipelineEvent) {
        let sent = match self.tx.lock() {
            Ok(tx) => tx.send(event).is_ok(),
            Err(_) => false,
        };
        if !sent {
            log::debug!("result receiver gone; dropping event");
        }
    }
}

impl ResultSink for ChannelSink {
    fn on_face(&self, frame: FrameId, result: RecognitionResult) {
        self.send(PipelineEvent::Face {
            frame: frame.0,
            result,
        });
    }

    fn on_objects(&self, frame: FrameId, result: ObjectDetectionResult) {
        self.send(PipelineEvent::Objects {
            frame: frame.0,
            result,
        });
    }
}

/// Keeps every result in memory, in arrival order.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn face_results(&self, frame: FrameId) -> Vec<RecognitionResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Face { frame: f, result } if f == frame.0 => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn object_results(&self, frame: FrameId) -> Vec<ObjectDetectionResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Objects { frame: f, result } if f == frame.0 => Some(result),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl ResultSink for CollectingSink {
    fn on_face(&self, frame: FrameId, result: RecognitionResult) {
        self.push(PipelineEvent::Face {
            frame: frame.0,
            result,
        });
    }

    fn on_objects(&self, frame: FrameId, result: ObjectDetectionResult) {
        self.push(PipelineEvent::Objects {
            frame: frame.0,
            result,
        });
    }
}
