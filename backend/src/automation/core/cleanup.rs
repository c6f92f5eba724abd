use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AutomationError, AutomationResult};

/// Owns a spawned task and aborts it when dropped before completion, so an
/// abandoned request never leaves a browser session running behind it.
pub struct TaskGuard<T> {
    handle: Option<JoinHandle<T>>,
    label: String,
}

impl<T: Send + 'static> TaskGuard<T> {
    pub fn spawn<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
            label: label.into(),
        }
    }

    /// Waits at most `limit` for the task. On timeout the task is aborted.
    pub async fn join(mut self, limit: Duration) -> AutomationResult<T> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(AutomationError::Browser(format!("{} already joined", self.label)));
        };
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(value)) => {
                self.handle = None;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.handle = None;
                Err(AutomationError::Browser(format!("{} task failed: {}", self.label, e)))
            }
            Err(_) => {
                warn!(label = %self.label, limit_secs = limit.as_secs(), "Task timed out, aborting");
                Err(AutomationError::Timeout(self.label.clone()))
            }
        }
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!(label = %self.label, "Aborting abandoned task");
            }
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let guard = TaskGuard::spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result = guard.join(Duration::from_secs(180)).await;
        assert!(matches!(result, Err(AutomationError::Timeout(_))));

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_join_returns_value() {
        let guard = TaskGuard::spawn("quick", async { 42 });
        assert_eq!(guard.join(Duration::from_secs(1)).await.unwrap(), 42);
    }
}
