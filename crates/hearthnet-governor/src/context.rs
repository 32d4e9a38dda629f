use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use hearthnet_types::GovernorError;

/// The request-scoped context threaded through every suspending governor
/// call: a cancellation token, an optional deadline, and a flag marking
/// whether this request originates from background polling.
///
/// Cloning (via the `with_*`/`mark_as_polling` constructors) always shares
/// the parent's `CancellationToken` — cancelling a derived context's
/// underlying token is observed by every context derived from the same
/// root, matching how cancellation propagates to children elsewhere in
/// the ecosystem.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    polling: bool,
}

impl RequestContext {
    /// A fresh root context: no deadline, not polling, a new cancellation
    /// token owned by this context alone.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            polling: false,
        }
    }

    /// Wrap an externally-owned cancellation token (e.g. one shared with
    /// an HTTP request handler) as a root context.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            polling: false,
        }
    }

    /// Derive a child context with a deadline `timeout` from now. The
    /// child shares this context's cancellation token and polling flag.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(Instant::now() + timeout),
            polling: self.polling,
        }
    }

    /// Derive a child context tagged as background polling. All other
    /// attributes are preserved.
    pub fn mark_as_polling(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            polling: true,
        }
    }

    /// Whether this context (or any ancestor it was derived from) is
    /// tagged as background polling.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True if cancellation has already fired or the deadline has already
    /// passed, checked synchronously without suspending.
    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Race an arbitrary future against this context's cancellation token
    /// and deadline, returning whichever fires first.
    pub(crate) async fn race<F, T>(&self, fut: F) -> Result<T, GovernorError>
    where
        F: Future<Output = T>,
    {
        if self.is_expired() {
            return Err(self.expiry_error());
        }
        match self.deadline {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(GovernorError::Cancelled),
                    () = sleep => Err(GovernorError::DeadlineExceeded),
                    value = fut => Ok(value),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(GovernorError::Cancelled),
                    value = fut => Ok(value),
                }
            }
        }
    }

    fn expiry_error(&self) -> GovernorError {
        if self.cancel.is_cancelled() {
            GovernorError::Cancelled
        } else {
            GovernorError::DeadlineExceeded
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
