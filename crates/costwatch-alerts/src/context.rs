//! Caller-driven cancellation threaded through every collaborator call.

use tokio_util::sync::CancellationToken;

use crate::error::{AlertError, Result};

/// Per-request context.
///
/// Collaborators never time out on their own; callers cancel the token instead.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
}

impl RequestContext {
    /// Creates a context that is never cancelled unless [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context observing an existing token.
    #[must_use]
    pub const fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derives a context that is cancelled with this one but can also be cancelled alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancels the context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`AlertError::Cancelled`] once the context has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Cancelled` if the context is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AlertError::Cancelled);
        }
        Ok(())
    }
}
