use serde::{Deserialize, Serialize};

pub mod sync;

pub use sync::{ObjectKind, SyncEvent};

use crate::meta::EventSource;

/// Top-level event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Window and bulkhead events
    Sync(SyncEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::Sync(SyncEvent::SemaphoresDisabled { .. }) => EventSource::PLATFORM,
            Self::Sync(
                SyncEvent::TicketRejected { .. }
                | SyncEvent::TicketsResized { .. }
                | SyncEvent::WorkerRegistered { .. },
            )
            | Self::Sync(
                SyncEvent::LockTimedOut {
                    kind: ObjectKind::Resource,
                    ..
                }
                | SyncEvent::ObjectDestroyed {
                    kind: ObjectKind::Resource,
                    ..
                },
            ) => EventSource::RESOURCE,
            Self::Sync(_) => EventSource::WINDOW,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::Sync(SyncEvent::SemaphoresDisabled { .. } | SyncEvent::LockTimedOut { .. }) => {
                Level::WARN
            }

            Self::Sync(
                SyncEvent::TicketsResized { .. }
                | SyncEvent::WindowResized { .. }
                | SyncEvent::ObjectDestroyed { .. },
            ) => Level::INFO,

            // Rejections are routine under load
            Self::Sync(
                SyncEvent::TicketRejected { .. }
                | SyncEvent::WorkerRegistered { .. }
                | SyncEvent::WindowReattached { .. },
            ) => Level::DEBUG,
        }
    }
}
