//! Storage backends for sliding windows

use std::fmt;
use std::time::Duration;

use bulwark_errors::{Error, PlatformError, SyncError};

use crate::ring::Ring;

pub mod local;
#[cfg(unix)]
pub mod sysv;

pub use local::LocalWindow;
#[cfg(unix)]
pub use sysv::SysvWindow;

/// Where a window's entries live and how access to them is serialised
///
/// Every method that reads or writes entries runs inside the backend's
/// critical section. `timeout` bounds the wait to enter it; zero means a
/// single non-blocking attempt.
pub trait WindowBackend: Send + Sync + fmt::Debug {
    /// Run `body` with exclusive access to the ring
    fn with_ring(&self, timeout: Duration, body: &mut dyn FnMut(&mut Ring<'_>))
        -> Result<(), Error>;

    /// Change capacity to `max_size`, keeping the newest entries
    ///
    /// Returns the previous capacity.
    fn resize(&self, max_size: usize, timeout: Duration) -> Result<usize, Error>;

    /// Remove the backing objects; later calls on any handle fail
    fn destroy(&self) -> Result<(), Error>;

    /// Whether other processes can see this window
    fn is_shared(&self) -> bool;
}

/// Translate a kernel failure into the error callers are promised
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn sync_error(
    name: &str,
    operation: &str,
    timeout: Duration,
    err: &PlatformError,
) -> Error {
    if err.is_would_block() {
        SyncError::Timeout {
            name: name.to_string(),
            timeout_ms: millis(timeout),
        }
        .into()
    } else {
        SyncError::internal(name, operation, err.to_string()).into()
    }
}

pub(crate) fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
