//! Ticket pools behind a bulkhead

use std::fmt;
use std::time::Duration;

use bulwark_errors::{Error, PlatformError, SyncError};

pub mod local;
pub mod passthrough;
#[cfg(unix)]
pub mod sysv;

pub use local::LocalTicketPool;
pub use passthrough::PassThroughPool;
#[cfg(unix)]
pub use sysv::SysvTicketPool;

/// Counting admission control shared by every handle on a name
pub trait TicketPool: Send + Sync + fmt::Debug {
    /// Take one ticket, waiting up to `timeout`; zero tries once
    fn take(&self, timeout: Duration) -> Result<(), Error>;

    /// Return a ticket taken with [`take`](Self::take)
    fn give(&self) -> Result<(), Error>;

    /// Bring the ticket count in line with the policy and worker count
    ///
    /// Waits at most `wait` for another process's resize to finish and
    /// skips the sync if it does not. Never waits for ticket holders: a
    /// shrink that needs held tickets completes on a later sync.
    fn sync_tickets(&self, wait: Duration) -> Result<(), Error>;

    /// Whether an earlier sync left a shrink unfinished
    fn resize_pending(&self) -> bool {
        false
    }

    /// Configured ticket count
    fn tickets(&self) -> Result<u32, Error>;

    /// Tickets not currently held
    fn available(&self) -> Result<u32, Error>;

    /// Tickets currently held, from one consistent reading
    fn held(&self) -> Result<u32, Error>;

    fn registered_workers(&self) -> Result<u32, Error>;

    /// Drop this process's worker registration
    fn unregister_worker(&self) -> Result<(), Error>;

    /// Remove the backing objects; later calls on any handle fail
    fn destroy(&self) -> Result<(), Error>;

    /// Id of the backing semaphore set, if there is one
    fn semid(&self) -> Option<i32> {
        None
    }

    /// Whether other processes share this pool
    fn is_shared(&self) -> bool;
}

#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn sync_error(
    name: &str,
    operation: &str,
    timeout: Duration,
    err: &PlatformError,
) -> Error {
    if err.is_would_block() {
        SyncError::TicketUnavailable {
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

pub(crate) fn unavailable(name: &str, timeout: Duration) -> Error {
    SyncError::TicketUnavailable {
        name: name.to_string(),
        timeout_ms: millis(timeout),
    }
    .into()
}
