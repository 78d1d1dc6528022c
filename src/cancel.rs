//! Operator cancellation.
//!
//! A [`CancelHandle`] is held by whoever can interrupt a run (the CLI wires
//! it to Ctrl-C); the executor holds the matching [`CancelToken`] and races
//! every suspension point against it.

use crate::error::{AppResult, SchedulerError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx: Some(rx) })
}

/// Requests cancellation. Clones signal the same token.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        // No handle, or handle dropped without cancelling: this can never fire.
        std::future::pending::<()>().await;
    }

    /// Run `fut` unless cancellation arrives first.
    pub async fn guard<T, F>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        if self.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SchedulerError::Cancelled),
            result = fut => result,
        }
    }
}
