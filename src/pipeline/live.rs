use anyhow::{anyhow, Result};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::orchestrator::Orchestrator;
use crate::frame::Frame;

/// Outcome of offering a frame to the live pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// The pipeline was busy; the frame was released without analysis.
    Dropped,
}

/// Keep-only-latest admission: at most one frame in flight, anything offered
/// meanwhile is dropped rather than queued.
#[derive(Debug, Default)]
pub struct FrameGate {
    busy: AtomicBool,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate. False if a frame is already in flight.
    pub fn try_enter(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn leave(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

struct GatePass<'a>(&'a FrameGate);

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
}

/// Live mode: frames are offered from the camera callback and analysed on a
/// dispatcher thread. Results reach the orchestrator's sink.
pub struct RecognitionPipeline {
    orchestrator: Arc<Orchestrator>,
    gate: Arc<FrameGate>,
    counters: Arc<Counters>,
    tx: Mutex<Option<SyncSender<Frame>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionPipeline {
    pub fn start(orchestrator: Orchestrator) -> Result<Self> {
        let orchestrator = Arc::new(orchestrator);
        let gate = Arc::new(FrameGate::new());
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::sync_channel::<Frame>(1);

        let worker_orchestrator = orchestrator.clone();
        let worker_gate = gate.clone();
        let worker_counters = counters.clone();
        let dispatcher = thread::Builder::new()
            .name("frame-dispatcher".to_string())
            .spawn(move || {
                for frame in rx {
                    let _pass = GatePass(&worker_gate);
                    let frame_id = frame.id();
                    match panic::catch_unwind(AssertUnwindSafe(|| {
                        worker_orchestrator.process_frame(frame)
                    })) {
                        Ok(report) => {
                            log::debug!("frame {} processed: {:?}", frame_id, report);
                        }
                        Err(_) => log::error!("frame {} processing panicked", frame_id),
                    }
                    worker_counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                log::debug!("frame dispatcher stopped");
            })?;

        Ok(Self {
            orchestrator,
            gate,
            counters,
            tx: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Hand a frame to the pipeline without blocking.
    ///
    /// If a frame is still in flight the new one is released immediately and
    /// `Dropped` is returned.
    pub fn offer(&self, frame: Frame) -> Offer {
        if !self.gate.try_enter() {
            return self.drop_frame(frame, "pipeline busy");
        }
        let rejected = match self.tx.lock() {
            Ok(tx) => match tx.as_ref() {
                Some(tx) => match tx.try_send(frame) {
                    Ok(()) => None,
                    Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => {
                        Some(frame)
                    }
                },
                None => Some(frame),
            },
            Err(_) => Some(frame),
        };
        match rejected {
            None => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Offer::Accepted
            }
            Some(frame) => {
                self.gate.leave();
                self.drop_frame(frame, "pipeline stopped")
            }
        }
    }

    fn drop_frame(&self, frame: Frame, why: &str) -> Offer {
        log::debug!("frame {} dropped: {}", frame.id(), why);
        frame.release();
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        Offer::Dropped
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Finish the frame in flight, stop the dispatcher, then stop the model
    /// workers. Later offers are dropped.
    pub fn shutdown(&self) -> Result<()> {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let dispatcher = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(_) => None,
        };
        if let Some(dispatcher) = dispatcher {
            dispatcher
                .join()
                .map_err(|_| anyhow!("frame dispatcher thread panicked"))?;
            log::info!("pipeline stopped: {:?}", self.stats());
        }
        self.orchestrator.shutdown()
    }
}

impl Drop for RecognitionPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("pipeline shutdown failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_admits_one_at_a_time() {
        let gate = FrameGate::new();
        assert!(gate.try_enter());
        assert!(gate.is_busy());
        assert!(!gate.try_enter());
        gate.leave();
        assert!(gate.try_enter());
    }

    #[test]
    fn gate_pass_leaves_on_drop() {
        let gate = FrameGate::new();
        assert!(gate.try_enter());
        drop(GatePass(&gate));
        assert!(!gate.is_busy());
    }
}
