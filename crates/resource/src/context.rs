//! Execution context for storage operations.
//!
//! Every [`Storer`](crate::storage::Storer) operation receives a [`Context`] as
//! its first argument. The context carries an optional deadline and any number
//! of cancellation signals inherited from its ancestors. Storage handlers check
//! it before issuing a native call, forward the remaining time budget to the
//! server where the driver allows it, and check it again once results arrive.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ContextError;

/// A cancellable, deadline-bearing execution context.
///
/// Contexts are cheap to clone and derive from one another: a child created
/// with [`Context::with_cancel`] or [`Context::with_timeout`] is cancelled
/// whenever its parent is, and never outlives the parent's deadline.
///
/// ```
/// use std::time::Duration;
/// use strata_resource::context::Context;
///
/// let (ctx, handle) = Context::background()
///     .with_timeout(Duration::from_secs(5))
///     .with_cancel();
/// assert!(ctx.err().is_none());
///
/// handle.cancel();
/// assert!(ctx.err().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    /// Earliest deadline of this context and its ancestors.
    deadline: Option<Instant>,
    /// Cancellation signals of this context and its ancestors.
    signals: Vec<watch::Receiver<bool>>,
}

/// Cancels the [`Context`] it was created with, and every context derived
/// from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancels the associated context. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            deadline: None,
            signals: Vec::new(),
        }
    }

    /// Derives a context that expires after `timeout`.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Derives a context that expires at `deadline`.
    ///
    /// An earlier deadline inherited from the parent is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        });
        self
    }

    /// Derives a context that can be cancelled through the returned handle.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.signals.push(receiver);
        (
            self,
            CancelHandle {
                sender: Arc::new(sender),
            },
        )
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if any.
    ///
    /// Saturates at zero once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the reason this context is done, or `None` while it is live.
    ///
    /// Cancellation is reported in preference to an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|signal| *signal.borrow()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns `Err` if the context is done.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        let cancelled = async {
            if self.signals.is_empty() {
                std::future::pending::<()>().await;
            }
            let waits = self
                .signals
                .iter()
                .cloned()
                .map(|signal| Box::pin(wait_cancelled(signal)));
            futures_util::future::select_all(waits).await;
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                ContextError::Cancelled
            }
        }
    }

    /// Runs `fut` to completion unless the context finishes first.
    ///
    /// When the context wins the race, `fut` is dropped and the context error
    /// is returned. A context that is already done never polls `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: IntoFuture,
    {
        self.check()?;
        let fut = fut.into_future();
        tokio::select! {
            biased;
            output = fut => Ok(output),
            err = self.done() => Err(err),
        }
    }
}

async fn wait_cancelled(mut signal: watch::Receiver<bool>) {
    loop {
        let cancelled = *signal.borrow_and_update();
        if cancelled {
            return;
        }
        // A dropped handle can never cancel.
        let closed = signal.changed().await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
