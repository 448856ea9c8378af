#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for bulwark
//!
//! Windows and bulkheads report what they do through typed events rather
//! than printing. Library code only ever emits; the binary (or the host
//! application) decides where events go.
//!
//! ## Architecture
//!
//! - **Typed events**: `SyncEvent` for window and bulkhead activity, wrapped in `AppEvent`
//! - **`EventEmitter` trait**: single API for anything holding an optional sender
//! - **Tracing integration**: every event carries a tracing level via `EventMeta`
//! - **One-time warnings**: `warn_once` for diagnostics that must not repeat per call

pub mod events;
pub mod meta;

pub use events::{AppEvent, ObjectKind, SyncEvent};
pub use meta::{EventLevel, EventMeta, EventSource};

use std::collections::BTreeSet;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// An event together with its metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    #[must_use]
    pub fn new(meta: EventMeta, event: AppEvent) -> Self {
        Self { meta, event }
    }

    /// Wrap an event with metadata derived from the event itself
    #[must_use]
    pub fn from_event(event: AppEvent) -> Self {
        let mut meta = EventMeta::new(event.log_level(), event.event_source());
        if let AppEvent::Sync(sync) = &event {
            if let Some(subject) = sync.subject() {
                meta = meta.with_correlation_id(subject);
            }
        }
        Self { meta, event }
    }
}

/// Type alias for the event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for the event receiver
pub type EventReceiver = UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout bulwark
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(EventMessage::from_event(event));
        }
    }

    fn emit_sync(&self, event: SyncEvent) {
        self.emit(AppEvent::Sync(event));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}

static WARNED: Mutex<BTreeSet<&'static str>> = Mutex::new(BTreeSet::new());

/// Emit `event` at most once per `key` for the life of the process
///
/// Logs through `tracing` and forwards to `emitter`. Returns whether this
/// call was the one that emitted.
pub fn warn_once(key: &'static str, emitter: &impl EventEmitter, event: SyncEvent) -> bool {
    let first = match WARNED.lock() {
        Ok(mut warned) => warned.insert(key),
        Err(poisoned) => poisoned.into_inner().insert(key),
    };
    if first {
        tracing::warn!(key, event = ?event, "bulwark warning");
        emitter.emit_sync(event);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_once_fires_once_per_key() {
        let (tx, mut rx) = channel();
        let event = || SyncEvent::SemaphoresDisabled {
            reason: "test".into(),
        };

        assert!(warn_once("lib-test-key", &tx, event()));
        assert!(!warn_once("lib-test-key", &tx, event()));
        assert!(warn_once("lib-test-other-key", &tx, event()));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_message_correlates_on_subject() {
        let message = EventMessage::from_event(AppEvent::Sync(SyncEvent::TicketRejected {
            name: "mysql".into(),
            timeout_ms: 0,
        }));
        assert_eq!(message.meta.correlation_id.as_deref(), Some("mysql"));
        assert_eq!(message.meta.source, EventSource::RESOURCE);
        assert_eq!(message.meta.level, EventLevel::Debug);
    }
}
