//! Request context carrying cancellation and an optional deadline.
//!
//! A `RequestContext` is created by the caller of a batch and handed to every
//! evaluation spawned for it. Cancellation is cooperative: code that wants to
//! stop early asks [`RequestContext::err`] or awaits [`RequestContext::done`].

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DomainError;

/// Cancellation scope for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Sets a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the reason this context is done, or `None` while it is live.
    pub fn err(&self) -> Option<DomainError> {
        if self.token.is_cancelled() {
            return Some(DomainError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DomainError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves when the context is cancelled or its deadline passes,
    /// yielding the corresponding error.
    pub async fn done(&self) -> DomainError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DomainError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DomainError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DomainError::Cancelled
            }
        }
    }
}
