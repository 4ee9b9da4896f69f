//! Fire-and-forget background work.
//!
//! A fixed pool of workers drains one bounded queue. Submitting never
//! waits: when the queue is full or the runner has shut down the task is
//! dropped with a warning. Failures and panics are logged and never retried.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::AppResult;

struct Job {
    name: &'static str,
    work: BoxFuture<'static, AppResult<()>>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

pub struct TaskRunner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunner {
    /// Spawn `workers` workers over a queue holding at most `capacity` tasks.
    /// Must be called inside a tokio runtime.
    pub fn start(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| tokio::spawn(run_worker(id, rx.clone())))
            .collect();

        tracing::info!(workers, capacity, "Task runner started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue `task`. Returns `false` when it was dropped.
    pub fn submit<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            tracing::warn!(task = name, "Task runner is shut down, dropping task");
            return false;
        };

        match sender.try_send(Job {
            name,
            work: task.boxed(),
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!(task = job.name, "Task queue full, dropping task");
                false
            }
            Err(TrySendError::Closed(job)) => {
                tracing::warn!(task = job.name, "Task queue closed, dropping task");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop accepting work and wait up to `grace` for queued and in-flight
    /// tasks. Workers still busy after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => tracing::info!("Task runner drained"),
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Task runner did not drain in time, aborting workers"
                );
                for handle in aborts {
                    handle.abort();
                }
            }
        }
    }
}

async fn run_worker(id: usize, rx: SharedReceiver) {
    loop {
        // Only one idle worker waits on the queue at a time
        let job = rx.lock().await.recv().await;
        let Some(job) = job else { break };

        match AssertUnwindSafe(job.work).catch_unwind().await {
            Ok(Ok(())) => tracing::debug!(task = job.name, worker = id, "Task finished"),
            Ok(Err(e)) => tracing::error!(task = job.name, error = %e, "Background task failed"),
            Err(_) => tracing::error!(task = job.name, "Background task panicked"),
        }
    }
    tracing::debug!(worker = id, "Task worker stopped");
}
