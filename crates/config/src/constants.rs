//! Fixed limits shared by every process attaching to the same objects
//!
//! These are not exposed via TOML configuration: two processes
//! disagreeing on the segment layout would corrupt each other's windows.

use std::time::Duration;

/// Owner and group read/write.
pub const DEFAULT_PERMISSIONS: u32 = 0o660;

/// Largest window a shared segment may hold.
pub const WINDOW_CAPACITY_CEILING: usize = 1000;

/// Bound on bookkeeping sections (ticket resizing, worker registration).
pub const INTERNAL_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `destroy` waits for a window's lock before removing its objects
/// regardless.
pub const DESTROY_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a process waits for a peer to finish initialising a fresh set.
pub const INIT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_WINDOW_SIZE: usize = 10;
