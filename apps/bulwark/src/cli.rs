//! Command line interface definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// bulwark - inspect and exercise process-shared bulkheads and sliding windows
#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and exercise process-shared bulkheads and sliding windows")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Args)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Lock / ticket timeout in milliseconds (0 = try once)
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Run as if synchronisation primitives were unavailable
    #[arg(long, global = true)]
    pub no_semaphores: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Sliding window operations
    #[command(subcommand)]
    Window(WindowCommands),

    /// Bulkhead operations
    #[command(subcommand)]
    Resource(ResourceCommands),
}

/// Window name plus the capacity used when it has to be created
#[derive(Args)]
pub struct WindowTarget {
    /// Window name
    pub name: String,

    /// Capacity; resizes an existing window when given
    #[arg(long)]
    pub size: Option<usize>,
}

#[derive(Subcommand)]
pub enum WindowCommands {
    /// Show capacity and entries
    Show(WindowTarget),

    /// Append values, evicting the oldest when full
    Push {
        #[command(flatten)]
        target: WindowTarget,

        /// Values to append, oldest first
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },

    /// Remove the oldest entry
    Pop(WindowTarget),

    /// Remove every entry
    Clear(WindowTarget),

    /// Change capacity, keeping the newest entries
    Resize {
        /// Window name
        name: String,

        /// New capacity
        size: usize,
    },

    /// Remove the window's kernel objects
    Destroy {
        /// Window name
        name: String,
    },

    /// Enter the window's critical section and stay there
    Hold {
        #[command(flatten)]
        target: WindowTarget,

        /// Leave after this many milliseconds instead of waiting to be killed
        #[arg(long, value_name = "MS")]
        hold_ms: Option<u64>,
    },
}

/// Bulkhead name plus its ticket policy
#[derive(Args)]
pub struct ResourceTarget {
    /// Resource name
    pub name: String,

    /// Fixed ticket count
    #[arg(long, conflicts_with = "quota")]
    pub tickets: Option<u32>,

    /// Tickets as a fraction of registered workers, in (0, 1]
    #[arg(long)]
    pub quota: Option<f64>,
}

#[derive(Subcommand)]
pub enum ResourceCommands {
    /// Show tickets, holders and registered workers
    Show {
        /// Resource name
        name: String,
    },

    /// Remove the bulkhead's semaphore set
    Destroy {
        /// Resource name
        name: String,
    },

    /// Take a ticket and keep it
    Hold {
        #[command(flatten)]
        target: ResourceTarget,

        /// Release after this many milliseconds instead of waiting to be killed
        #[arg(long, value_name = "MS")]
        hold_ms: Option<u64>,
    },
}
