//! Fire-and-forget background work
//!
//! Tasks spawned here never affect the request that started them: errors
//! and panics are logged and swallowed. On shutdown the set is drained with
//! a deadline.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;

/// Tracks background tasks so shutdown can wait for them
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task`, logging its error if it fails
    pub fn spawn<F, E>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap finished tasks so the set does not grow without bound
        while let Some(result) = tasks.try_join_next() {
            log_join_result(result);
        }

        tasks.spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "Background task failed");
            }
        });
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for outstanding tasks, aborting whatever is left after `grace`
    ///
    /// Returns the number of tasks that were aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let drain = async {
            while let Some(result) = tasks.join_next().await {
                log_join_result(result);
            }
        };

        if tokio::time::timeout(grace, drain).await.is_ok() {
            return 0;
        }

        let remaining = tasks.len();
        tracing::warn!(remaining, "Aborting background tasks after grace period");
        tasks.shutdown().await;
        remaining
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
}
