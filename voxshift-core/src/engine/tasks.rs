//! Background work context.
//!
//! Conversions and playback run on tokio's blocking pool. Each submission
//! carries a [`SessionToken`]; when the work finishes the token is checked
//! and a result from a session that has since moved on resolves as
//! [`TaskOutcome::Stale`] instead of being applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, VoxError};

/// Generation counter shared by the engine and every token it hands out.
#[derive(Debug, Default, Clone)]
pub struct SessionCounter(Arc<AtomicU64>);

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session; every token issued before this becomes stale.
    pub fn advance(&self) -> SessionToken {
        let generation = self.0.fetch_add(1, Ordering::AcqRel) + 1;
        SessionToken {
            generation,
            counter: Arc::clone(&self.0),
        }
    }

    /// Token for the current session.
    pub fn token(&self) -> SessionToken {
        SessionToken {
            generation: self.0.load(Ordering::Acquire),
            counter: Arc::clone(&self.0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    generation: u64,
    counter: Arc<AtomicU64>,
}

impl SessionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.generation
    }
}

/// Final state of a background task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// Finished after its session moved on; the result was discarded.
    Stale,
    /// The worker went away without reporting (panic or runtime shutdown).
    Lost,
}

impl<T> TaskOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, TaskOutcome::Stale)
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<TaskOutcome<T>>,
    token: SessionToken,
    runtime: Handle,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Block the calling thread until the task resolves.
    ///
    /// Must not be called from inside an async context or from an audio
    /// callback.
    pub fn wait(self) -> TaskOutcome<T> {
        self.rx.blocking_recv().unwrap_or(TaskOutcome::Lost)
    }

    /// Await the outcome from async code.
    pub async fn outcome(self) -> TaskOutcome<T> {
        self.rx.await.unwrap_or(TaskOutcome::Lost)
    }

    /// Run `callback` with the outcome once the task resolves. Returns
    /// immediately.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(TaskOutcome<T>) + Send + 'static,
    {
        let rx = self.rx;
        self.runtime.spawn(async move {
            callback(rx.await.unwrap_or(TaskOutcome::Lost));
        });
    }
}

/// Owns (or borrows) the tokio runtime used for background work.
pub struct BackgroundWorker {
    handle: Handle,
    owned: Option<Runtime>,
}

impl BackgroundWorker {
    /// Use the ambient runtime when called inside one, otherwise start a
    /// small private runtime.
    pub fn new() -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self {
                handle,
                owned: None,
            });
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("voxshift-worker")
            .enable_all()
            .build()
            .map_err(VoxError::Io)?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(runtime),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `work` on the blocking pool. If `token` is still current when it
    /// finishes, `commit` runs with a reference to the result and the handle
    /// resolves as `Completed`; otherwise it resolves as `Stale`.
    pub fn submit<T, W, C>(
        &self,
        label: &'static str,
        token: SessionToken,
        work: W,
        commit: C,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(&T) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task_token = token.clone();
        self.handle.spawn_blocking(move || {
            debug!(label, generation = task_token.generation(), "background task started");
            let result = work();
            let outcome = if task_token.is_current() {
                commit(&result);
                TaskOutcome::Completed(result)
            } else {
                debug!(label, generation = task_token.generation(), "discarding stale result");
                TaskOutcome::Stale
            };
            if tx.send(outcome).is_err() {
                warn!(label, "task handle dropped before completion");
            }
        });
        TaskHandle {
            rx,
            token,
            runtime: self.handle.clone(),
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn advancing_invalidates_older_tokens() {
        let counter = SessionCounter::new();
        let first = counter.advance();
        assert!(first.is_current());
        let second = counter.advance();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(counter.token().generation(), second.generation());
    }

    #[test]
    fn completed_task_commits_and_resolves() {
        let worker = BackgroundWorker::new().unwrap();
        let counter = SessionCounter::new();
        let (tx, rx) = mpsc::channel();
        let handle = worker.submit("sum", counter.advance(), || 2 + 2, move |v| {
            tx.send(*v).unwrap();
        });
        assert_eq!(handle.wait().completed(), Some(4));
        assert_eq!(rx.recv().unwrap(), 4);
    }

    #[test]
    fn result_after_session_change_is_stale() {
        let worker = BackgroundWorker::new().unwrap();
        let counter = SessionCounter::new();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let handle = worker.submit(
            "slow",
            counter.advance(),
            move || {
                gate_rx.recv().ok();
                "late"
            },
            |_| panic!("stale result must not be committed"),
        );
        counter.advance();
        gate_tx.send(()).unwrap();
        assert!(handle.wait().is_stale());
    }

    #[test]
    fn on_complete_runs_callback() {
        let worker = BackgroundWorker::new().unwrap();
        let counter = SessionCounter::new();
        let (tx, rx) = mpsc::channel();
        worker
            .submit("cb", counter.advance(), || 7u32, |_| {})
            .on_complete(move |outcome| {
                tx.send(outcome.completed()).unwrap();
            });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(7));
    }
}
