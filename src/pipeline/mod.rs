//! Recognition orchestration.
//!
//! - `worker`: one serial thread per model instance.
//! - `completion`: single-resolution bridge from model jobs to waiters.
//! - `lease`: per-frame completion counting; releases each frame once.
//! - `orchestrator`: runs the face path, object path and extra consumers for
//!   one frame.
//! - `live`: keep-only-latest admission and the dispatcher thread.
//! - `sink`: where results go.

mod completion;
mod lease;
mod live;
mod orchestrator;
mod sink;
mod worker;

pub use completion::{completion, Completion, Resolver};
pub use lease::{AnalysisTicket, FrameLease};
pub use live::{FrameGate, Offer, PipelineStats, RecognitionPipeline};
pub use orchestrator::{
    ConsumerReport, FrameConsumer, FrameReport, Orchestrator, OrchestratorBuilder,
};
pub use sink::{ChannelSink, CollectingSink, PipelineEvent, ResultSink};
pub use worker::ModelWorker;
