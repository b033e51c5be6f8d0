//! Once-per-key task deduplication.
//!
//! The first caller for a key runs the work; everyone else — concurrent or
//! later — waits on a latch and receives the memoized result. The map lock
//! is held only to insert the latch, never across the work itself.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A cloneable task failure, shared by every caller of the failed key.
#[derive(Debug, Clone)]
pub struct TaskError(pub Arc<anyhow::Error>);

impl TaskError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TaskError {}

type Outcome<T> = Result<T, TaskError>;

struct Latch<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
}

/// Deduplicates async work by string key.
pub struct TaskGroup<T = ()> {
    tasks: DashMap<String, Latch<T>>,
}

impl<T: Clone + Send + Sync + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Runs `work` for `key` exactly once; every caller gets the same
    /// result. Recursive calls for *different* keys are fine; a recursive
    /// call for the same key would deadlock, as would any key cycle.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let tx = match self.tasks.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let rx = entry.get().rx.clone();
                drop(entry);
                return Self::wait_latch(rx).await;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(Latch { rx });
                tx
            }
        };

        let outcome = work().await;
        // Nobody may be listening; that is fine.
        let _ = tx.send(Some(outcome.clone()));
        outcome
    }

    /// Blocks until every task started so far has completed.
    pub async fn wait(&self) {
        loop {
            let receivers: Vec<watch::Receiver<Option<Outcome<T>>>> =
                self.tasks.iter().map(|entry| entry.rx.clone()).collect();
            let before = receivers.len();
            for rx in receivers {
                let _ = Self::wait_latch(rx).await;
            }
            if self.tasks.len() == before {
                return;
            }
        }
    }

    async fn wait_latch(mut rx: watch::Receiver<Option<Outcome<T>>>) -> Outcome<T> {
        loop {
            if let Some(outcome) = rx.borrow().as_ref() {
                return outcome.clone();
            }
            if rx.changed().await.is_err() {
                // The runner was dropped without sending; treat as failure.
                return Err(TaskError::new(anyhow::anyhow!(
                    "task abandoned before completion"
                )));
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}
