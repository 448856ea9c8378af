//! Platform-specific operation errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Errors that can occur while talking to kernel IPC objects
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlatformError {
    #[error("{call} failed (errno {errno}): {message}")]
    SyscallFailed {
        call: String,
        errno: i32,
        message: String,
    },

    /// The semaphore set or segment was removed (EIDRM / EINVAL).
    #[error("{call}: kernel object was removed")]
    ObjectRemoved { call: String },

    /// A non-blocking or timed wait could not complete (EAGAIN).
    #[error("{call}: operation would block")]
    WouldBlock { call: String },

    #[error("platform capability not available: {capability}")]
    CapabilityUnavailable { capability: String },
}

impl PlatformError {
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::ObjectRemoved { .. })
    }

    #[must_use]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock { .. })
    }
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SyscallFailed { errno, .. } if *errno == 13 => {
                Some("Check the permissions the IPC objects were created with.")
            }
            Self::SyscallFailed { errno, .. } if *errno == 28 => {
                Some("Kernel IPC limits are exhausted; see ipcs -l.")
            }
            Self::CapabilityUnavailable { .. } => {
                Some("SysV IPC is unavailable here; synchronization runs in pass-through mode.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SyscallFailed { .. } => "platform.syscall",
            Self::ObjectRemoved { .. } => "platform.object_removed",
            Self::WouldBlock { .. } => "platform.would_block",
            Self::CapabilityUnavailable { .. } => "platform.capability_unavailable",
        };
        Some(code)
    }
}
