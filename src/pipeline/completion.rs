//! Single-resolution bridge between a model callback and a waiting caller.
//!
//! A [`Resolver`] is consumed by resolving it, so a second resolution does not
//! compile:
//!
//! ```compile_fail
//! use assist_vision::pipeline::completion;
//!
//! let (resolver, _pending) = completion::<u32>();
//! resolver.resolve(1);
//! resolver.resolve(2);
//! ```
//!
//! Dropping a resolver without resolving it (the worker shut down, the job
//! panicked, the callback was never invoked) is observed as
//! `PipelineError::Cancelled`.

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

use crate::error::PipelineError;

/// Create a linked resolver/completion pair.
pub fn completion<T>() -> (Resolver<T>, Completion<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Resolver { tx }, Completion { rx })
}

/// Write side. Resolves at most once.
pub struct Resolver<T> {
    tx: SyncSender<Result<T>>,
}

impl<T> Resolver<T> {
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(self, err: anyhow::Error) {
        self.settle(Err(err));
    }

    pub fn settle(self, result: Result<T>) {
        // The waiter may have gone away; the outcome is then discarded.
        if self.tx.send(result).is_err() {
            log::debug!("completion resolved after its waiter left");
        }
    }
}

impl<T: Send + 'static> Resolver<T> {
    /// Adapt to a callback-style API that reports `Result<T>` once.
    pub fn into_callback(self) -> impl FnOnce(Result<T>) + Send + 'static {
        move |result| self.settle(result)
    }
}

/// Read side.
pub struct Completion<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// Block until resolved, failed or cancelled.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Cancelled.into()),
        }
    }

    /// Non-blocking poll. `None` while still pending.
    pub fn try_wait(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PipelineError::Cancelled.into())),
        }
    }
}
