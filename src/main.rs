//! socket-sensor - stream readings from a Unix-socket sensor

use clap::{Parser, Subcommand};
use serde_json::json;
use socket_sensor::config::{ConfigError, SensorConfig, SocketSection};
use socket_sensor::observability::{init_default_logging, init_logging, logging, LogFormat};
use socket_sensor::{SensorClient, SensorResult};
use std::env;
use std::path::PathBuf;
use std::process;
use tokio::{signal, time::Duration};
use tracing::{debug, error, info, Level};

/// Background client for a newline-delimited JSON sensor on a Unix socket
#[derive(Parser)]
#[command(name = "socket-sensor")]
#[command(about = "Stream JSON readings from a Unix domain socket sensor")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SENSOR_CONFIG")]
    config: Option<PathBuf>,

    /// Socket path; used instead of a configuration file
    #[arg(short, long, value_name = "PATH", conflicts_with = "config")]
    socket: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print each new reading as a JSON line
    Run {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Validate configuration and exit
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        n => {
            let level = if n == 1 { Level::DEBUG } else { Level::TRACE };
            let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
            let spans = logging::parse_flag(&env::var("LOG_SPANS").unwrap_or_default());
            init_logging(level, format, spans);
        }
    }

    debug!("socket-sensor v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config, &cli.socket) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { interval_ms } => run_sensor(config, interval_ms).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Validate => {
            info!("Configuration is valid");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    socket: &Option<PathBuf>,
) -> SensorResult<SensorConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(SensorConfig::load_from_file(path)?);
    }

    if let Some(socket) = socket {
        let config = SensorConfig::from(SocketSection::new(socket));
        config.validate()?;
        return Ok(config);
    }

    for candidate in ["sensor.toml", "config/sensor.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(SensorConfig::load_from_file(&path)?);
        }
    }

    Err(ConfigError::InvalidConfig(
        "no configuration found; pass -c/--config, -s/--socket or create sensor.toml".to_string(),
    )
    .into())
}

async fn run_sensor(config: SensorConfig, interval_ms: u64) -> SensorResult<()> {
    let mut client = SensorClient::new(config)?;
    client.start()?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut last_printed = 0;

    info!("Sensor client running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                match client.latest_reading() {
                    Ok(reading) if reading.sequence != last_printed => {
                        last_printed = reading.sequence;
                        let line = json!({
                            "received_at": reading.received_at.map(|t| t.to_rfc3339()),
                            "sequence": reading.sequence,
                            "reading": reading.record.as_ref(),
                        });
                        println!("{line}");
                    }
                    Ok(_) => {}
                    Err(e) => debug!("No reading: {}", e),
                }
            }
        }
    }

    client.shutdown().await;
    info!("Sensor client stopped");
    Ok(())
}

fn handle_config_command(config: &SensorConfig, show: bool) -> SensorResult<()> {
    if show {
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
