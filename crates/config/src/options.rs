//! Constructor parameters for windows and resources
//!
//! These carry the whole configuration surface a handle accepts: the name
//! key, capacity, permissions and the default acquisition timeout.

use crate::constants::{DEFAULT_PERMISSIONS, DEFAULT_WINDOW_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a bulkhead sizes its ticket count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPolicy {
    /// A fixed number of tickets shared by every worker
    Fixed(u32),
    /// A fraction of the registered workers, rounded up
    Quota(f64),
}

impl Default for TicketPolicy {
    fn default() -> Self {
        Self::Fixed(1)
    }
}

/// Options for opening a sliding window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOptions {
    pub name: String,
    pub size: usize,
    pub permissions: u32,
    pub timeout: Duration,
}

impl WindowOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: DEFAULT_WINDOW_SIZE,
            permissions: DEFAULT_PERMISSIONS,
            timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options for opening a bulkhead resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOptions {
    pub name: String,
    pub policy: TicketPolicy,
    pub quota_minimum_tickets: u32,
    pub permissions: u32,
    pub timeout: Duration,
}

impl ResourceOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: TicketPolicy::default(),
            quota_minimum_tickets: 1,
            permissions: DEFAULT_PERMISSIONS,
            timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn tickets(mut self, tickets: u32) -> Self {
        self.policy = TicketPolicy::Fixed(tickets);
        self
    }

    #[must_use]
    pub fn quota(mut self, quota: f64) -> Self {
        self.policy = TicketPolicy::Quota(quota);
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured ticket count, or `None` when it is derived from a quota
    #[must_use]
    pub fn fixed_tickets(&self) -> Option<u32> {
        match self.policy {
            TicketPolicy::Fixed(n) => Some(n),
            TicketPolicy::Quota(_) => None,
        }
    }
}
