//! Per-call deadline and cancellation.
//!
//! Every call that leaves the process (embedding batch, vector backend
//! operation, rerank request) is wrapped in [`CallContext::guard`] so a caller
//! can bound it with a deadline or abort it through a [`CancelHandle`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a guarded call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interrupted {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled by caller")]
    Cancelled,
}

/// Owner side of a cancellation signal. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CallContext {
    /// A context with no deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout), cancel: None }
    }

    /// Returns a cancellable copy of this context plus the handle that cancels it.
    pub fn cancellable(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { deadline: self.deadline, cancel: Some(rx) }, CancelHandle { tx })
    }

    /// Tightens the deadline to `timeout` from now, keeping an earlier one if set.
    pub fn bounded(&self, timeout: Option<Duration>) -> Self {
        let Some(timeout) = timeout else { return self.clone() };
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self { deadline: Some(deadline), cancel: self.cancel.clone() }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check used between pipeline stages.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` unless the deadline passes or the caller cancels first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        let cancelled = wait_cancelled(self.cancel.clone());
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = cancelled => Err(Interrupted::Cancelled),
            () = expired => Err(Interrupted::DeadlineExceeded),
            value = fut => Ok(value),
        }
    }
}

async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else { return std::future::pending().await };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without cancelling.
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_passes_through_when_unbounded() {
        let ctx = CallContext::background();
        assert_eq!(ctx.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn guard_reports_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        let out = ctx.guard(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancel_before_call_short_circuits() {
        let (ctx, handle) = CallContext::background().cancellable();
        handle.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
        assert_eq!(ctx.guard(async { 1 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn cancel_during_call_interrupts_it() {
        let (ctx, handle) = CallContext::background().cancellable();
        let task = tokio::spawn(async move { ctx.guard(tokio::time::sleep(Duration::from_secs(5))).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert_eq!(task.await.ok(), Some(Err(Interrupted::Cancelled)));
    }

    #[test]
    fn bounded_keeps_earlier_deadline() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().expect("rt");
        rt.block_on(async {
            let tight = CallContext::with_timeout(Duration::from_millis(5));
            let loose = tight.bounded(Some(Duration::from_secs(60)));
            assert_eq!(loose.deadline(), tight.deadline());
        });
    }
}
