use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use super::completion::{completion, Completion};
use crate::error::PipelineError;

type Job<M> = Box<dyn FnOnce(Result<&mut M, PipelineError>) + Send>;

/// Dedicated serial thread owning one model instance.
///
/// The model is built on the worker thread by the loader, so it never crosses
/// threads and need not be `Send`. Jobs run one at a time in submission
/// order. If the loader fails, every job is answered with `ModelLoad`.
pub struct ModelWorker<M> {
    name: String,
    tx: Mutex<Option<Sender<Job<M>>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<M: 'static> ModelWorker<M> {
    pub fn spawn<F>(name: &str, loader: F) -> Result<Self>
    where
        F: FnOnce() -> Result<M> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job<M>>();
        let model_name = name.to_string();
        let join = thread::Builder::new()
            .name(format!("model-{}", name))
            .spawn(move || {
                let mut state = match loader() {
                    Ok(model) => {
                        log::info!("model '{}' loaded", model_name);
                        Ok(model)
                    }
                    Err(e) => {
                        log::error!("model '{}' failed to load: {:#}", model_name, e);
                        Err(PipelineError::ModelLoad {
                            model: model_name.clone(),
                            reason: format!("{:#}", e),
                        })
                    }
                };
                for job in rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match state.as_mut() {
                        Ok(model) => job(Ok(model)),
                        Err(err) => job(Err(err.clone())),
                    }));
                    if outcome.is_err() {
                        log::error!("model '{}' job panicked; job cancelled", model_name);
                    }
                }
                log::debug!("model worker '{}' stopped", model_name);
            })?;
        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `task` against the model. After shutdown the returned
    /// completion reports `Cancelled`.
    pub fn submit<T, F>(&self, task: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut M) -> Result<T> + Send + 'static,
    {
        let (resolver, pending) = completion();
        let job: Job<M> = Box::new(move |model: Result<&mut M, PipelineError>| match model {
            Ok(model) => resolver.settle(task(model)),
            Err(err) => resolver.fail(err.into()),
        });
        let sent = match self.tx.lock() {
            Ok(tx) => match tx.as_ref() {
                Some(tx) => tx.send(job).is_ok(),
                None => false,
            },
            Err(_) => false,
        };
        if !sent {
            log::debug!("model worker '{}' is stopped; job cancelled", self.name);
        }
        pending
    }

    /// Stop accepting jobs, drain the queue and join the thread.
    pub fn shutdown(&self) -> Result<()> {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let join = match self.join.lock() {
            Ok(mut join) => join.take(),
            Err(_) => None,
        };
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("model worker '{}' thread panicked", self.name))?;
        }
        Ok(())
    }
}

impl<M> Drop for ModelWorker<M> {
    fn drop(&mut self) {
        if let Ok(tx) = self.tx.get_mut() {
            tx.take();
        }
        if let Ok(join) = self.join.get_mut() {
            if let Some(join) = join.take() {
                let _ = join.join();
            }
        }
    }
}
