//! Structured logging of events
//!
//! Converts events drained from the library crates into tracing records
//! with structured fields.

use bulwark_events::{AppEvent, EventMessage, SyncEvent};
use tracing::{debug, info, warn};

/// Log an event at the level its domain assigns, with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;
    let pid = meta.labels.get("pid").map(String::as_str);
    let AppEvent::Sync(event) = &message.event;
    match event {
        SyncEvent::SemaphoresDisabled { reason } => {
            warn!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, reason = %reason, "Synchronisation disabled");
        }
        SyncEvent::LockTimedOut {
            kind,
            name,
            timeout_ms,
        } => {
            warn!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, kind = ?kind, name = %name, timeout_ms, "Lock timed out");
        }
        SyncEvent::TicketRejected { name, timeout_ms } => {
            warn!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, name = %name, timeout_ms, "Ticket rejected");
        }
        SyncEvent::TicketsResized { name, from, to } => {
            info!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, name = %name, from, to, "Tickets resized");
        }
        SyncEvent::WorkerRegistered { name, workers } => {
            debug!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, name = %name, workers, "Worker registered");
        }
        SyncEvent::WindowResized { name, from, to } => {
            info!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, name = %name, from, to, "Window resized");
        }
        SyncEvent::WindowReattached { name, max_size } => {
            debug!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, name = %name, max_size, "Window re-attached");
        }
        SyncEvent::ObjectDestroyed { kind, name } => {
            info!(source = meta.source.as_str(), event_id = %meta.event_id, pid = ?pid, kind = ?kind, name = %name, "Objects destroyed");
        }
    }
}
