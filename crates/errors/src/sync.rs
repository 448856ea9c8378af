//! Errors raised by the cross-process lock, sliding window and ticket pool

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum SyncError {
    /// A blocking acquisition did not succeed before the caller's deadline.
    #[error("timed out after {timeout_ms}ms waiting for {name}")]
    Timeout { name: String, timeout_ms: u64 },

    /// Bulkhead rejection: no ticket was returned in time.
    #[error("no ticket available for {name} within {timeout_ms}ms")]
    TicketUnavailable { name: String, timeout_ms: u64 },

    /// The kernel object behind a handle vanished or is in an unexpected state.
    #[error("internal error on {name} during {operation}: {message}")]
    Internal {
        name: String,
        operation: String,
        message: String,
    },

    #[error("window capacity {requested} exceeds ceiling of {ceiling}")]
    CapacityExceeded { requested: usize, ceiling: usize },

    #[error("invalid capacity {requested}: must be at least 1")]
    InvalidCapacity { requested: usize },

    #[error("invalid quota {quota}: must be greater than 0 and at most 1")]
    InvalidQuota { quota: f64 },
}

impl SyncError {
    /// `TicketUnavailable` is a specialisation of `Timeout`.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::TicketUnavailable { .. })
    }

    pub fn internal(
        name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Internal {
            name: name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl UserFacingError for SyncError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } => Some("Another process holds the lock; retry or raise the timeout."),
            Self::TicketUnavailable { .. } => {
                Some("All tickets are in use; retry later or raise the ticket count.")
            }
            Self::Internal { .. } => {
                Some("The shared object may have been destroyed; recreate the handle.")
            }
            Self::CapacityExceeded { .. } | Self::InvalidCapacity { .. } => {
                Some("Pick a window size between 1 and the capacity ceiling.")
            }
            Self::InvalidQuota { .. } => Some("Use a quota in the range (0, 1]."),
        }
    }

    fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "sync.timeout",
            Self::TicketUnavailable { .. } => "sync.ticket_unavailable",
            Self::Internal { .. } => "sync.internal",
            Self::CapacityExceeded { .. } => "sync.capacity_exceeded",
            Self::InvalidCapacity { .. } => "sync.invalid_capacity",
            Self::InvalidQuota { .. } => "sync.invalid_quota",
        };
        Some(code)
    }
}
