//! Deadline and cancellation contexts for backend calls.
//!
//! Every collection operation has a `_with_ctx` twin taking a [`Ctx`]. The plain variant
//! derives a context from the configured default timeout, runs the twin, and releases the
//! context when it returns. Contexts form a tree: a derived context keeps the nearer of its
//! own and its parent's deadline and is cancelled whenever any ancestor is.
//!
//! ```ignore
//! let (ctx, _cancel) = Ctx::background().with_timeout(Duration::from_secs(5));
//! collection.create_with_ctx(&ctx, &mut doc).await?;
//! ```

use std::{any::Any, fmt, future::Future, sync::Arc, time::Duration};

use futures::future::select_all;
use tokio::{sync::watch, time::Instant};

use crate::error::{OdmError, OdmResult};

type SessionHandle = Arc<dyn Any + Send + Sync>;

/// An operation context carrying an optional deadline, cancellation signals and session.
#[derive(Clone, Default)]
pub struct Ctx {
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    cancellations: Vec<watch::Receiver<bool>>,
    session: Option<SessionHandle>,
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("deadline", &self.deadline)
            .field("cancellations", &self.cancellations.len())
            .field("session", &self.session.is_some())
            .finish()
    }
}

/// Cancels the context it was created with, either explicitly or when dropped.
#[derive(Debug)]
pub struct CancelGuard {
    sender: watch::Sender<bool>,
}

impl CancelGuard {
    /// Cancels the associated context and every context derived from it.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Ctx {
    /// An empty context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Ctx, CancelGuard) {
        let (mut ctx, guard) = self.with_cancel();
        let deadline = Instant::now() + timeout;

        if ctx.deadline.is_none_or(|current| deadline < current) {
            ctx.deadline = Some(deadline);
            ctx.timeout = Some(timeout);
        }

        (ctx, guard)
    }

    /// Derives a context that can be cancelled through the returned guard.
    pub fn with_cancel(&self) -> (Ctx, CancelGuard) {
        let (sender, receiver) = watch::channel(false);
        let mut ctx = self.clone();
        ctx.cancellations.push(receiver);

        (ctx, CancelGuard { sender })
    }

    /// Derives a context bound to a backend session.
    pub fn with_session<S: Any + Send + Sync>(&self, session: Arc<S>) -> Ctx {
        let session: SessionHandle = session;

        Ctx {
            session: Some(session),
            ..self.clone()
        }
    }

    /// Returns the deadline of this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the session of type `S` bound to this context, if any.
    pub fn session<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        self.session
            .clone()
            .and_then(|session| session.downcast::<S>().ok())
    }

    /// Returns `true` once this context or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellations
            .iter()
            .any(|receiver| *receiver.borrow() || receiver.has_changed().is_err())
    }

    /// Runs `future` bounded by this context.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Timeout`] when the deadline elapses first and
    /// [`OdmError::Cancelled`] when the context is cancelled first. Otherwise the
    /// future's own result is returned unchanged.
    pub async fn run<F, T>(&self, future: F) -> OdmResult<T>
    where
        F: Future<Output = OdmResult<T>>,
    {
        if self.is_cancelled() {
            return Err(OdmError::Cancelled);
        }

        let cancelled = self.cancelled();
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = future => result,
            _ = cancelled => Err(OdmError::Cancelled),
            _ = deadline => Err(OdmError::Timeout(self.timeout.unwrap_or_default())),
        }
    }

    async fn cancelled(&self) {
        if self.cancellations.is_empty() {
            return std::future::pending().await;
        }

        let waits = self.cancellations.iter().cloned().map(|mut receiver| {
            Box::pin(async move {
                // A dropped sender means the guard is gone, which also cancels.
                let _ = receiver.wait_for(|cancelled| *cancelled).await;
            })
        });

        select_all(waits).await;
    }
}
