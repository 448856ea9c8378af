//! Platform layer for cross-process synchronization.
//!
//! This crate provides:
//! - Capability detection for SysV semaphores and shared memory
//! - Safe wrappers over SysV semaphore sets (with undo-on-exit) and
//!   shared memory segments
//! - `PlatformContext`, which carries the detected capabilities and the
//!   event sender into every window and bulkhead handle
//!
//! All `unsafe` FFI in the workspace lives in `sysv`.

pub mod capabilities;
pub mod context;
#[cfg(unix)]
pub mod sysv;

pub use capabilities::Capabilities;
pub use context::PlatformContext;
