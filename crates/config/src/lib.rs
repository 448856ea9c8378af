#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for bulwark
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/bulwark/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

pub mod constants;
pub mod core;
pub mod options;

pub use crate::core::{GeneralConfig, ResourceConfig, WindowConfig};
pub use options::{ResourceOptions, TicketPolicy, WindowOptions};

use bulwark_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub window: WindowConfig,
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("bulwark").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.display().to_string(),
        })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path),
            None => Self::load(),
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // BULWARK_SEMAPHORES_DISABLED
        if let Ok(disabled) = std::env::var("BULWARK_SEMAPHORES_DISABLED") {
            self.general.semaphores_enabled = match disabled.as_str() {
                "true" | "1" | "yes" => false,
                "false" | "0" | "no" => true,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "BULWARK_SEMAPHORES_DISABLED".to_string(),
                        value: disabled,
                    }
                    .into())
                }
            };
        }

        // BULWARK_TIMEOUT_MS
        if let Ok(timeout) = std::env::var("BULWARK_TIMEOUT_MS") {
            let timeout_ms: u64 = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                field: "BULWARK_TIMEOUT_MS".to_string(),
                value: timeout.clone(),
            })?;
            self.resource.timeout_ms = timeout_ms;
            self.window.timeout_ms = timeout_ms;
        }

        // BULWARK_PERMISSIONS (octal, with or without 0o prefix)
        if let Ok(permissions) = std::env::var("BULWARK_PERMISSIONS") {
            let mode = parse_octal(&permissions).ok_or_else(|| ConfigError::InvalidValue {
                field: "BULWARK_PERMISSIONS".to_string(),
                value: permissions.clone(),
            })?;
            self.resource.permissions = mode;
            self.window.permissions = mode;
        }

        Ok(())
    }

    /// Window options for `name` seeded from the `[window]` section
    #[must_use]
    pub fn window_options(&self, name: impl Into<String>) -> WindowOptions {
        WindowOptions::new(name)
            .size(self.window.default_size)
            .permissions(self.window.permissions)
            .timeout(Duration::from_millis(self.window.timeout_ms))
    }

    /// Resource options for `name` seeded from the `[resource]` section
    #[must_use]
    pub fn resource_options(&self, name: impl Into<String>) -> ResourceOptions {
        let mut options = ResourceOptions::new(name)
            .permissions(self.resource.permissions)
            .timeout(Duration::from_millis(self.resource.timeout_ms));
        options.quota_minimum_tickets = self.resource.quota_minimum_tickets;
        options
    }
}

fn parse_octal(value: &str) -> Option<u32> {
    let digits = value.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).ok()?;
    (mode <= 0o777).then_some(mode)
}
