//! Safe wrappers over SysV IPC
//!
//! Semaphore operations taken with `undo` are recorded by the kernel and
//! reversed when the process exits, however it exits. That is what keeps a
//! `SIGKILL`ed worker from leaving a lock or a ticket held forever.

mod semaphore;
mod shm;

pub use semaphore::{SemOp, SemaphoreSet};
pub use shm::SharedSegment;

use bulwark_errors::PlatformError;

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Turn the current `errno` into a `PlatformError` for `call`
fn last_error(call: &str) -> PlatformError {
    let err = std::io::Error::last_os_error();
    let code = err.raw_os_error().unwrap_or(0);
    match code {
        libc::EAGAIN => PlatformError::WouldBlock {
            call: call.to_string(),
        },
        libc::EIDRM | libc::EINVAL => PlatformError::ObjectRemoved {
            call: call.to_string(),
        },
        _ => PlatformError::SyscallFailed {
            call: call.to_string(),
            errno: code,
            message: err.to_string(),
        },
    }
}

fn permission_bits(permissions: u32) -> libc::c_int {
    // masked to 9 bits, always fits
    (permissions & 0o777) as libc::c_int
}
