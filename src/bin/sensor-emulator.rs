//! sensor-emulator - push sample readings over a Unix socket

use clap::Parser;
use socket_sensor::observability::init_default_logging;
use socket_sensor::testing::SensorEmulator;
use socket_sensor::SensorResult;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sensor-emulator")]
#[command(about = "Serve newline-delimited JSON sample readings on a Unix socket")]
#[command(version)]
struct Args {
    /// Socket path to bind (a stale file is removed first)
    #[arg(short, long, default_value = "/tmp/unix_socket_example")]
    socket: PathBuf,

    /// Milliseconds between readings
    #[arg(short, long, default_value_t = 100)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> SensorResult<()> {
    let args = Args::parse();
    init_default_logging();

    let emulator =
        match SensorEmulator::samples(&args.socket, Duration::from_millis(args.interval_ms.max(1))).await {
            Ok(emulator) => emulator,
            Err(e) => {
                error!(path = %args.socket.display(), error = %e, "Failed to bind emulator socket");
                return Err(e.into());
            }
        };

    info!(path = %emulator.path().display(), "Emulator running, press Ctrl-C to stop");
    signal::ctrl_c().await?;

    info!(clients = emulator.accepted_clients(), "Shutting down emulator");
    emulator.shutdown().await;
    Ok(())
}
