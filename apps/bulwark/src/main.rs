//! bulwark - inspect and exercise process-shared bulkheads and sliding windows
//!
//! Every command opens the named objects exactly as an application worker
//! would, so `hold` can stand in for a worker that gets killed mid-section.

mod cli;
mod display;
mod error;
mod logging;

use std::io::Write;
use std::process;
use std::thread;
use std::time::Duration;

use bulwark_config::{Config, ResourceOptions, TicketPolicy, WindowOptions};
use bulwark_events::EventReceiver;
use bulwark_platform::PlatformContext;
use bulwark_resources::Resource;
use bulwark_window::SlidingWindow;
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands, GlobalArgs, ResourceCommands, ResourceTarget, WindowCommands, WindowTarget};
use crate::display::{OutputRenderer, Report, ResourceReport, WindowReport};
use crate::error::CliError;

/// Line printed once a `hold` command owns the lock or ticket
const HELD_MARKER: &str = "held";

fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli) {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(e.exit_code());
    }
}

/// Main application logic
fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting bulwark v{}", env!("CARGO_PKG_VERSION"));

    // Configuration precedence: file (or defaults), environment, flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).map_err(CliError::Config)?;
    config.merge_env().map_err(CliError::Config)?;
    apply_cli_config(&mut config, &cli.global);

    let (event_sender, mut event_receiver) = bulwark_events::channel();
    let context = PlatformContext::from_config(&config.general, Some(event_sender));
    let renderer = OutputRenderer::new(cli.global.json);

    let result = match cli.command {
        Commands::Window(command) => execute_window(&config, &context, command, &mut event_receiver),
        Commands::Resource(command) => {
            execute_resource(&config, &context, command, &mut event_receiver)
        }
    };
    drain_events(&mut event_receiver);
    let report = result?;

    renderer
        .render(&report)
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    info!("Command completed successfully");
    Ok(())
}

fn apply_cli_config(config: &mut Config, global: &GlobalArgs) {
    if let Some(timeout_ms) = global.timeout_ms {
        config.window.timeout_ms = timeout_ms;
        config.resource.timeout_ms = timeout_ms;
    }
    if global.no_semaphores {
        config.general.semaphores_enabled = false;
    }
}

fn drain_events(receiver: &mut EventReceiver) {
    while let Ok(message) = receiver.try_recv() {
        logging::log_event_with_tracing(&message);
    }
}

fn window_options(config: &Config, target: &WindowTarget) -> WindowOptions {
    let options = config.window_options(&target.name);
    match target.size {
        Some(size) => options.size(size),
        None => options,
    }
}

fn open_window(
    config: &Config,
    context: &PlatformContext,
    target: &WindowTarget,
) -> Result<SlidingWindow, CliError> {
    let options = window_options(config, target);
    let window = if target.size.is_some() {
        SlidingWindow::open(context, &options)?
    } else {
        SlidingWindow::attach(context, &options)?
    };
    Ok(window)
}

fn window_report(window: &SlidingWindow, popped: Option<i64>) -> Result<Report, CliError> {
    let (max_size, entries) = window.execute_atomically(window.timeout(), |ring| {
        (ring.max_size(), ring.to_vec())
    })?;
    Ok(Report::Window(WindowReport {
        name: window.name().to_string(),
        key: window.key().map(|key| key.to_string()),
        shared: window.is_shared(),
        max_size,
        size: entries.len(),
        entries,
        popped,
    }))
}

fn execute_window(
    config: &Config,
    context: &PlatformContext,
    command: WindowCommands,
    events: &mut EventReceiver,
) -> Result<Report, CliError> {
    match command {
        WindowCommands::Show(target) => window_report(&open_window(config, context, &target)?, None),
        WindowCommands::Push { target, values } => {
            let window = open_window(config, context, &target)?;
            window.execute_atomically(window.timeout(), |ring| {
                for value in &values {
                    ring.push(*value);
                }
            })?;
            window_report(&window, None)
        }
        WindowCommands::Pop(target) => {
            let window = open_window(config, context, &target)?;
            let popped = window.pop()?;
            window_report(&window, popped)
        }
        WindowCommands::Clear(target) => {
            let window = open_window(config, context, &target)?;
            window.clear()?;
            window_report(&window, None)
        }
        WindowCommands::Resize { name, size } => {
            let target = WindowTarget {
                name,
                size: Some(size),
            };
            window_report(&open_window(config, context, &target)?, None)
        }
        WindowCommands::Destroy { name } => {
            let target = WindowTarget { name, size: None };
            let window = open_window(config, context, &target)?;
            window.destroy()?;
            Ok(Report::Done {
                message: format!("destroyed window {}", window.name()),
            })
        }
        WindowCommands::Hold { target, hold_ms } => {
            let window = open_window(config, context, &target)?;
            let held = window.execute_atomically(window.timeout(), |_| {
                announce_held().and_then(|()| {
                    drain_events(events);
                    hold(hold_ms);
                    Ok(())
                })
            })?;
            held?;
            Ok(Report::Done {
                message: format!("released window {}", window.name()),
            })
        }
    }
}

fn resource_options(config: &Config, target: &ResourceTarget) -> Result<ResourceOptions, CliError> {
    let options = config.resource_options(&target.name);
    let options = match (target.tickets, target.quota) {
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArguments(
                "--tickets and --quota are mutually exclusive".to_string(),
            ))
        }
        (Some(tickets), None) => options.tickets(tickets),
        (None, Some(quota)) => options.quota(quota),
        (None, None) => options,
    };
    Ok(options)
}

fn resource_report(resource: &Resource) -> Result<Report, CliError> {
    Ok(Report::Resource(ResourceReport {
        name: resource.name().to_string(),
        semid: resource.semid(),
        shared: resource.is_shared(),
        tickets: resource.tickets()?,
        available: resource.available()?,
        held: resource.count()?,
        registered_workers: resource.registered_workers()?,
    }))
}

fn execute_resource(
    config: &Config,
    context: &PlatformContext,
    command: ResourceCommands,
    events: &mut EventReceiver,
) -> Result<Report, CliError> {
    match command {
        ResourceCommands::Show { name } => {
            let resource = Resource::attach(context, &config.resource_options(name))?;
            resource_report(&resource)
        }
        ResourceCommands::Destroy { name } => {
            let resource = Resource::attach(context, &config.resource_options(name))?;
            resource.destroy()?;
            Ok(Report::Done {
                message: format!("destroyed resource {}", resource.name()),
            })
        }
        ResourceCommands::Hold { target, hold_ms } => {
            let options = resource_options(config, &target)?;
            if matches!(options.policy, TicketPolicy::Quota(_)) {
                info!(resource = %options.name, "ticket count follows registered workers");
            }
            let resource = Resource::open(context, &options)?;
            let ticket = resource.acquire(resource.timeout())?;
            announce_held()?;
            drain_events(events);
            hold(hold_ms);
            drop(ticket);
            Ok(Report::Done {
                message: format!("released resource {}", resource.name()),
            })
        }
    }
}

fn announce_held() -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{HELD_MARKER}")?;
    stdout.flush()?;
    Ok(())
}

/// Sleep for `hold_ms`, or until the process is killed
fn hold(hold_ms: Option<u64>) {
    match hold_ms {
        Some(ms) => thread::sleep(Duration::from_millis(ms)),
        None => loop {
            thread::park();
        },
    }
}

fn init_tracing(json_mode: bool, debug_enabled_flag: bool) {
    let default_filter = if debug_enabled_flag {
        "debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_mode {
        // Logs go to stderr so stdout stays valid JSON
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }
}
