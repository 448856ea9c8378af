//! Detection of the kernel primitives the shared backends need

use serde::Serialize;
use std::sync::OnceLock;

/// What the running platform supports, probed once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub semaphores: bool,
    pub shared_memory: bool,
}

static DETECTED: OnceLock<Capabilities> = OnceLock::new();

impl Capabilities {
    /// Probe the kernel by creating and removing private objects
    ///
    /// The result is cached; later calls do not touch the kernel.
    #[must_use]
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let detected = Self::probe();
            tracing::debug!(
                semaphores = detected.semaphores,
                shared_memory = detected.shared_memory,
                "probed SysV IPC capabilities"
            );
            detected
        })
    }

    /// Capabilities with every primitive switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            semaphores: false,
            shared_memory: false,
        }
    }

    /// Whether windows and bulkheads can use the shared backends
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.semaphores && self.shared_memory
    }

    /// Short description of what is missing, for diagnostics
    #[must_use]
    pub fn missing(&self) -> Option<&'static str> {
        match (self.semaphores, self.shared_memory) {
            (true, true) => None,
            (false, true) => Some("SysV semaphores are unavailable"),
            (true, false) => Some("SysV shared memory is unavailable"),
            (false, false) => Some("SysV semaphores and shared memory are unavailable"),
        }
    }

    #[cfg(unix)]
    fn probe() -> Self {
        Self {
            semaphores: crate::sysv::SemaphoreSet::probe(),
            shared_memory: crate::sysv::SharedSegment::probe(),
        }
    }

    #[cfg(not(unix))]
    fn probe() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_cached() {
        assert_eq!(Capabilities::detect(), Capabilities::detect());
    }

    #[test]
    fn test_disabled_reports_missing() {
        let caps = Capabilities::disabled();
        assert!(!caps.sync_enabled());
        assert_eq!(
            caps.missing(),
            Some("SysV semaphores and shared memory are unavailable")
        );
    }
}
