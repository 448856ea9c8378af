//! Events raised by windows and bulkheads

use serde::{Deserialize, Serialize};

/// Which kind of named object an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Window,
    Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Synchronization primitives are off; handles run as pass-through
    SemaphoresDisabled { reason: String },

    /// A critical section could not be entered in time
    LockTimedOut {
        kind: ObjectKind,
        name: String,
        timeout_ms: u64,
    },

    /// Bulkhead rejected a caller
    TicketRejected { name: String, timeout_ms: u64 },

    /// Configured ticket count changed
    TicketsResized { name: String, from: u32, to: u32 },

    /// A process registered itself as a worker of a bulkhead
    WorkerRegistered { name: String, workers: u32 },

    /// Window capacity changed, either explicitly or through a constructor
    WindowResized { name: String, from: usize, to: usize },

    /// A handle noticed a relocated segment and switched to it
    WindowReattached { name: String, max_size: usize },

    /// Kernel objects were removed
    ObjectDestroyed { kind: ObjectKind, name: String },
}

impl SyncEvent {
    /// Name of the window or resource the event is about
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::SemaphoresDisabled { .. } => None,
            Self::LockTimedOut { name, .. }
            | Self::TicketRejected { name, .. }
            | Self::TicketsResized { name, .. }
            | Self::WorkerRegistered { name, .. }
            | Self::WindowResized { name, .. }
            | Self::WindowReattached { name, .. }
            | Self::ObjectDestroyed { name, .. } => Some(name),
        }
    }
}
