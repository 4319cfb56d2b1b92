//! Worker pool executing task handlers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span};

use crate::task::TaskHandler;

/// Worker group handle.
/// - workers share one receiver and exit once every sender is dropped
/// - `join()` waits for all of them
pub struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers pulling from `tasks`.
    pub fn spawn(n: usize, tasks: mpsc::Receiver<TaskHandler>, service: &str) -> Self {
        let tasks = Arc::new(Mutex::new(tasks));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let rx = Arc::clone(&tasks);
            let span = info_span!("worker", service = %service, worker_id);
            joins.push(tokio::spawn(worker_loop(worker_id, rx).instrument(span)));
        }

        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Wait for every worker to drain the channel and exit.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, tasks: Arc<Mutex<mpsc::Receiver<TaskHandler>>>) {
    loop {
        // the lock is only held while waiting for the next handler
        let next = tasks.lock().await.recv().await;
        let Some(handler) = next else {
            break;
        };

        // a panicking task takes down its own tokio task, not the worker
        let id = handler.id();
        if let Err(err) = tokio::spawn(handler.exec()).await {
            error!(worker_id, task_id = %id, error = %err, "task panicked");
        }
    }

    debug!(worker_id, "worker stopped");
}
