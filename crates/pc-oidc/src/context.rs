//! Per-request bounds for outbound identity provider calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ProviderError;

/// Cancellation and deadline applied to each call made on behalf of one
/// inbound request.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Duration,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, deadline: Duration) -> Self {
        Self { cancel, deadline }
    }

    /// Context for calls with no inbound request, e.g. discovery at startup.
    pub fn detached(deadline: Duration) -> Self {
        Self::new(CancellationToken::new(), deadline)
    }

    /// Context tied to the lifetime of the returned guard.
    ///
    /// Handlers hold the guard for their whole body; when the handler future
    /// is dropped (client went away) the guard cancels every call still
    /// running under this context.
    pub fn scoped(deadline: Duration) -> (Self, DropGuard) {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        (Self::new(cancel, deadline), guard)
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one call, abandoning it on cancellation or once the deadline elapses.
    pub async fn run<F, T>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
            result = tokio::time::timeout(self.deadline, call) => {
                result.unwrap_or(Err(ProviderError::Timeout(self.deadline)))
            }
        }
    }
}
