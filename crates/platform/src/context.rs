//! Context handed to every window and bulkhead handle

use bulwark_config::GeneralConfig;
use bulwark_events::{EventEmitter, EventSender};

use crate::capabilities::Capabilities;

/// Capabilities plus event emission, chosen once and shared by handles
#[derive(Debug, Clone)]
pub struct PlatformContext {
    event_sender: Option<EventSender>,
    capabilities: Capabilities,
}

impl PlatformContext {
    /// Create a context from the detected platform capabilities
    #[must_use]
    pub fn new(event_sender: Option<EventSender>) -> Self {
        Self {
            event_sender,
            capabilities: Capabilities::detect(),
        }
    }

    /// Create a context honouring `semaphores_enabled` from configuration
    #[must_use]
    pub fn from_config(config: &GeneralConfig, event_sender: Option<EventSender>) -> Self {
        let capabilities = if config.semaphores_enabled {
            Capabilities::detect()
        } else {
            Capabilities::disabled()
        };
        Self {
            event_sender,
            capabilities,
        }
    }

    /// Create a context with explicit capabilities
    #[must_use]
    pub fn with_capabilities(
        capabilities: Capabilities,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            event_sender,
            capabilities,
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.capabilities.sync_enabled()
    }
}

impl EventEmitter for PlatformContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}
