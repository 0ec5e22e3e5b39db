use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Runs a batch of keyed tasks with at most `width` in flight.
///
/// A task that panics is reported as `Err(message)` under its key; it never
/// takes its siblings down.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Self {
        Self { width: width.max(1) }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run every task to completion. Results come back in completion order.
    pub async fn run<K, Fut>(&self, tasks: Vec<(K, Fut)>) -> Vec<(K, Result<Fut::Output, String>)>
    where
        K: Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut join_set = JoinSet::new();
        let mut results = Vec::with_capacity(tasks.len());

        for (key, task) in tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool semaphore closed: {}", e);
                    break;
                }
            };

            join_set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(task).catch_unwind().await;
                (key, outcome.map_err(panic_message))
            });

            // Reap whatever already finished so results don't pile up
            while let Some(done) = join_set.try_join_next() {
                match done {
                    Ok(result) => results.push(result),
                    Err(e) => error!("Worker task aborted: {}", e),
                }
            }
        }

        while let Some(done) = join_set.join_next().await {
            match done {
                Ok(result) => results.push(result),
                Err(e) => error!("Worker task aborted: {}", e),
            }
        }

        results
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}
