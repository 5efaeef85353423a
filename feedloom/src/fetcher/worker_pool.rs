//! Bounded-concurrency executor for fetch jobs.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Runs jobs with at most `worker_count` in flight. One panicking job is
/// logged and absorbed without taking the batch down.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(worker_count)),
        }
    }

    /// Processes `items` through `job`, respecting the worker limit.
    /// Stops dispatching new jobs once `shutdown` flips to true, then
    /// waits for the jobs already running.
    pub async fn process<T, F, Fut>(&self, items: Vec<T>, shutdown: &watch::Receiver<bool>, job: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for item in items {
            if *shutdown.borrow() {
                tracing::debug!("worker pool dispatch interrupted by shutdown");
                break;
            }

            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed while the pool is alive.
                Err(_) => break,
            };

            let fut = job(item);
            tasks.spawn(async move {
                let _permit = permit;
                if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                    tracing::error!(panic = panic_message(&panic), "panic in fetch worker");
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
