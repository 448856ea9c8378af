//! Configuration sections and their defaults

use crate::constants::{DEFAULT_PERMISSIONS, DEFAULT_WINDOW_SIZE};
use serde::{Deserialize, Serialize};

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// `false` forces pass-through mode even where SysV IPC works
    #[serde(default = "default_semaphores_enabled")]
    pub semaphores_enabled: bool,
}

/// Defaults for bulkhead resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_permissions")]
    pub permissions: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Floor applied to quota-derived ticket counts
    #[serde(default = "default_quota_minimum_tickets")]
    pub quota_minimum_tickets: u32,
}

/// Defaults for sliding windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_size")]
    pub default_size: usize,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            semaphores_enabled: true,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            permissions: DEFAULT_PERMISSIONS,
            timeout_ms: 0, // try once, fail fast
            quota_minimum_tickets: 1,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_WINDOW_SIZE,
            permissions: DEFAULT_PERMISSIONS,
            timeout_ms: 0,
        }
    }
}

// Default value functions for serde
fn default_semaphores_enabled() -> bool {
    true
}

fn default_permissions() -> u32 {
    DEFAULT_PERMISSIONS
}

fn default_timeout_ms() -> u64 {
    0
}

fn default_quota_minimum_tickets() -> u32 {
    1
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}
