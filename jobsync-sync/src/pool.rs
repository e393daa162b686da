//! Bounded worker pool for per-item work inside one operation.
//!
//! Items are dispatched in the order given. `dispatch` runs on the calling
//! task once a permit is free, so anything it does synchronously (logging
//! the dispatch line, marking the item in progress) happens in item order.
//! The future it returns runs in its own spawned task; a panic there becomes
//! [`WorkerError::Panicked`] for that item only.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("worker was cancelled")]
    Cancelled,
}

impl From<JoinError> for WorkerError {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return Self::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    width: usize,
}

impl WorkerPool {
    /// A pool running at most `width` items at once (at least one).
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run every item and return the results in input order.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, mut dispatch: F) -> Vec<Result<T, WorkerError>>
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = items.len();
        let mut set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let work = dispatch(item);
            set.spawn(async move {
                let _permit = permit;
                (idx, tokio::spawn(work).await)
            });
        }

        let mut results: Vec<Option<Result<T, WorkerError>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            // The outer task only awaits the inner one and cannot panic.
            if let Ok((idx, outcome)) = joined {
                results[idx] = Some(outcome.map_err(WorkerError::from));
            }
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(WorkerError::Cancelled)))
            .collect()
    }
}

/// Collapse a worker result and the item's own result into one message.
pub fn settle<T, E: Display>(result: Result<Result<T, E>, WorkerError>) -> Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}
