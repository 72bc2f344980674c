mod config;
mod console;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use std::process;

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use estim_lib::config::{LinkConfig, TriggerConfig};
use estim_lib::transport::{Link, TriggerLink};
use estim_lib::SessionController;

use config::AppConfig;
use console::Console;

/// Host controller for the electro-stimulation device.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use the simulated device instead of the SPI link.
    #[arg(long, conflicts_with = "device")]
    simulate: bool,
    /// SPI device path (e.g., /dev/spidev1.0). Implies the hardware link.
    #[arg(short, long)]
    device: Option<String>,
    /// Serial port of the start button.
    #[arg(short, long)]
    trigger_port: Option<String>,
    /// Session length used by `start` without an argument and by the start button, in seconds.
    #[arg(long)]
    duration: Option<u32>,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG still wins
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

/// Merge the config file with command-line overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if cli.simulate {
        let seed = match config.link {
            LinkConfig::Simulated { seed } => seed,
            LinkConfig::Hardware { .. } => None,
        };
        config.link = LinkConfig::Simulated { seed };
    }
    if let Some(device) = &cli.device {
        let speed_hz = match config.link {
            LinkConfig::Hardware { speed_hz, .. } => speed_hz,
            LinkConfig::Simulated { .. } => estim_lib::constants::SPI_DEFAULT_SPEED_HZ,
        };
        config.link = LinkConfig::Hardware {
            device: device.clone(),
            speed_hz,
        };
    }
    if let Some(port) = &cli.trigger_port {
        let baud_rate = config
            .trigger
            .as_ref()
            .map_or(estim_lib::constants::BUTTON_BAUD_RATE, |t| t.baud_rate);
        config.trigger = Some(TriggerConfig {
            port: port.clone(),
            baud_rate,
        });
    }
    if let Some(duration) = cli.duration {
        config.session.default_duration_secs = duration;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(&cli).await {
        error!("Controller failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    config
        .parameters
        .validate()
        .context("Invalid stimulation parameters in config")?;

    let link = Link::from_config(&config.link);
    info!(link = ?config.link, "Main link selected");

    let (mut controller, events) =
        SessionController::new(link, config.session.controller_config());

    // The button is optional; a missing port never keeps the controller down.
    if let Some(trigger) = &config.trigger {
        match TriggerLink::open(trigger) {
            Ok(link) => controller = controller.with_trigger(Link::Trigger(link)),
            Err(e) => warn!("Start button unavailable: {}", e),
        }
    }

    let handle = controller.handle();
    let task = controller.spawn();

    handle.update_parameters(config.parameters)?;
    if let Some(pid) = config.pid {
        handle.set_pid(pid)?;
    }

    let console = Console::new(
        handle.clone(),
        config.parameters,
        config.session.default_duration_secs,
    );
    let outcome = console.run(events).await;

    // stops a running session before the controller exits
    let _ = handle.shutdown();
    task.await.context("Session controller panicked")?;
    outcome
}
