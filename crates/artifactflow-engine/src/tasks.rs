//! Bounded pool for background graph executions.
//!
//! `submit` schedules immediately and never blocks the caller; the spawned
//! task waits for a semaphore permit internally, so LLM concurrency is
//! bounded without backpressuring HTTP intake. Handles are tracked by id so
//! tasks cannot be dropped mid-flight, and panics are caught and logged.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tracks background tasks under a concurrency bound.
pub struct TaskManager {
    tasks: DashMap<String, JoinHandle<()>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    /// Back-reference used by tasks to clean up after themselves.
    weak_self: Weak<TaskManager>,
}

impl TaskManager {
    /// Create a manager allowing `max_concurrent` tasks to run at once.
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        info!(max_concurrent, "task manager initialized");
        Arc::new_cyclic(|weak| Self {
            tasks: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            weak_self: weak.clone(),
        })
    }

    /// Schedule `work` under the concurrency bound.
    ///
    /// Returns immediately; the task itself blocks on a permit. The handle
    /// is tracked by `task_id` and removed when the task finishes.
    pub fn submit<F>(&self, task_id: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let manager = self.weak_self.clone();
        let id = task_id.to_string();
        let id_for_task = id.clone();

        // The task must not finish before its handle is tracked, or the
        // self-removal below would race the insert and leak the handle.
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = registered_rx.await;

            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Semaphore closed: shutting down.
                    return;
                }
            };

            if std::panic::AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .is_err()
            {
                error!(task_id = %id_for_task, "background task panicked");
            }

            if let Some(manager) = manager.upgrade() {
                manager.tasks.remove(&id_for_task);
                debug!(
                    task_id = %id_for_task,
                    active = manager.tasks.len(),
                    "task completed and cleaned up"
                );
            }
        });

        self.tasks.insert(id, handle);
        let _ = registered_tx.send(());
        debug!(task_id, active = self.tasks.len(), "task submitted");
    }

    /// Number of tracked (queued or running) tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Configured concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Graceful shutdown: wait up to `timeout` for tasks to finish, then
    /// cancel the survivors and await their teardown.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.tasks.is_empty() {
            info!("task manager shutdown: no active tasks");
            return;
        }

        info!(
            active = self.tasks.len(),
            timeout_s = timeout.as_secs(),
            "task manager shutdown: waiting for active tasks"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        while !self.tasks.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Cancel whatever is left and wait for the cancellations to land.
        let survivors: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        if !survivors.is_empty() {
            warn!(count = survivors.len(), "cancelling tasks that outlived the grace window");
        }
        let mut handles = Vec::with_capacity(survivors.len());
        for key in survivors {
            if let Some((_, handle)) = self.tasks.remove(&key) {
                handle.abort();
                handles.push(handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }

        info!("task manager shutdown complete");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
