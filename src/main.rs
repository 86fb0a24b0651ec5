//! # Thermo Link
//!
//! Monitor for a serial temperature sensor array.
//!
//! Connects to the sensor board, starts the background reader and prints a
//! status line every second until Ctrl+C.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use thermo_link::link::{connect_with_retry, RetryPolicy};
use thermo_link::serial::{find_candidate_port, list_ports};
use thermo_link::{Config, Connection, DataMode, TelemetrySnapshot};

/// Period of the status output
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Messages printed per status tick
const STATUS_MESSAGES: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "thermo-link")]
#[command(about = "Serial telemetry monitor for a temperature sensor array")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding config and auto-detection
    #[arg(short, long)]
    port: Option<String>,

    /// List serial ports and exit
    #[arg(short, long)]
    list: bool,

    /// Print each status snapshot as one JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(writer)
        .init();

    info!("Thermo Link v{} starting...", env!("CARGO_PKG_VERSION"));

    if cli.list {
        print_ports();
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    let port = resolve_port(&cli, &config)?;
    let connection = Connection::new(config);
    let policy = RetryPolicy::from(&connection.config().reconnect);

    if !connect_with_retry(&connection, &port, policy).await {
        warn!("Sensor board not reachable on {}; showing simulated data", port);
    }

    info!("Press Ctrl+C to exit");
    let mut ticker = interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = connection.snapshot();
                if cli.json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    print_status(&snapshot);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    let stats = connection.get_connection_stats();
    connection.disconnect().await;
    info!(
        "Total lines received: {}, errors: {}",
        stats.total_received, stats.error_count
    );

    Ok(())
}

/// Port from the command line, then config, then auto-detection
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }
    if !config.serial.port.is_empty() {
        return Ok(config.serial.port.clone());
    }
    match find_candidate_port() {
        Some(port) => {
            info!("Auto-detected sensor board at {}", port);
            Ok(port)
        }
        None => bail!("No sensor board found; pass --port or set serial.port"),
    }
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        println!("{}", port.label());
    }
}

fn print_status(snapshot: &TelemetrySnapshot) {
    let mode = match snapshot.mode {
        DataMode::Live => "live",
        DataMode::Simulated => "SIMULATED",
    };
    let temps: Vec<String> = snapshot
        .current
        .values()
        .map(|r| format!("#{} {:.1}°C", r.sensor_id, r.temperature))
        .collect();

    println!(
        "[{}] healthy={} received={} errors={} | {}",
        mode,
        snapshot.stats.is_healthy,
        snapshot.stats.total_received,
        snapshot.stats.error_count,
        temps.join("  ")
    );

    let skip = snapshot.messages.len().saturating_sub(STATUS_MESSAGES);
    for message in &snapshot.messages[skip..] {
        println!(
            "    {} [{}] {}",
            message.timestamp.format("%H:%M:%S"),
            message.level,
            message.message
        );
    }
}
