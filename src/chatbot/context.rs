//! Request context: cancellation plus an optional deadline.
//!
//! A context is handed to every operation that talks to the network or the
//! database. Cancelling the parent (e.g. on Ctrl+C) cancels every child;
//! children may tighten the deadline but never extend it.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Done::Cancelled => write!(f, "context cancelled"),
            Done::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// Cancels the context it was created with, and all children.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct RequestContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: None,
            deadline: None,
        }
    }

    /// A cancellable root context.
    pub fn with_cancel() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (CancelHandle { tx }, ctx)
    }

    /// Child context that also expires after `timeout`. A timeout too large
    /// to represent adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self {
            cancel: self.cancel.clone(),
            deadline,
        }
    }

    /// `Some` once the context is finished.
    pub fn err(&self) -> Option<Done> {
        if let Some(rx) = &self.cancel
            && *rx.borrow()
        {
            return Some(Done::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Done::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Done {
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    // A dropped handle can no longer cancel.
                    if rx.wait_for(|c| *c).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Done::Cancelled,
            _ = expired => Done::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Done> {
        if let Some(done) = self.err() {
            return Err(done);
        }
        tokio::select! {
            biased;
            done = self.done() => Err(done),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let (handle, parent) = RequestContext::with_cancel();
        let child = parent.with_timeout(Duration::from_secs(60));
        handle.cancel();

        assert_eq!(parent.err(), Some(Done::Cancelled));
        assert_eq!(child.err(), Some(Done::Cancelled));
        assert_eq!(child.run(async { 1 }).await, Err(Done::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let (handle, ctx) = RequestContext::with_cancel();
        let task = tokio::spawn(async move {
            ctx.run(tokio::time::sleep(Duration::from_secs(60))).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(Done::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(5));
        let out = ctx.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(out, Err(Done::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(Done::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_cannot_extend_parent_deadline() {
        let parent = RequestContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        let out = child.run(tokio::time::sleep(Duration::from_secs(2))).await;
        assert_eq!(out, Err(Done::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_huge_timeout_means_no_deadline() {
        let ctx = RequestContext::background().with_timeout(Duration::MAX);
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.run(async { 3 }).await, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_child_timeout_keeps_parent_deadline() {
        let parent = RequestContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::MAX);
        let out = child.run(tokio::time::sleep(Duration::from_secs(2))).await;
        assert_eq!(out, Err(Done::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, ctx) = RequestContext::with_cancel();
        drop(handle);
        assert_eq!(ctx.run(async { "ok" }).await, Ok("ok"));
    }
}
