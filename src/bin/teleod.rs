//! teleod - device binding and control-loop daemon
//!
//! Brings up the full daemon:
//! - remote command channel (newline-delimited JSON over TCP)
//! - joint telemetry feed for simulators
//! - local interactive console (unless started headless)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

use teleod::backend::{GenericDriver, StaticEnumerator, TcpRobotProbe, TeleoRobotConnector};
use teleod::link::DriverRegistry;
use teleod::{console, DaemonConfig, Dispatcher, RemoteConsole, Server, TelemetryFeed};

#[derive(Parser)]
#[command(name = "teleod")]
#[command(about = "Teleoperation daemon - binds controllers to robots and relays commands")]
#[command(version)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run without the local interactive console
    #[arg(long)]
    headless: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn get_config_path(&self) -> Option<String> {
        self.config
            .clone()
            .or_else(|| std::env::var("TELEOD_CONFIG").ok())
    }
}

fn log_level(debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(args.debug))
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match args.get_config_path() {
        Some(path) => {
            info!("Using config: {}", path);
            DaemonConfig::load_from_path(&path)
                .with_context(|| format!("Failed to load config from {}", path))?
        }
        None => {
            info!("No config given, using defaults");
            DaemonConfig::default()
        }
    };

    let virtual_path = config.virtual_robot_path();
    let enumerator = Arc::new(StaticEnumerator::new(config.server.devices.clone()));
    let probe = Arc::new(TcpRobotProbe::new(virtual_path.clone()));
    let connector = Arc::new(TeleoRobotConnector::new(virtual_path));
    let mut drivers = DriverRegistry::new();
    drivers.register(Arc::new(GenericDriver));

    let server = Arc::new(Server::new(
        config.clone(),
        enumerator,
        probe,
        connector,
        Arc::new(drivers),
    ));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&server)));

    let remote = RemoteConsole::spawn(Arc::clone(&dispatcher), config.server.remote_port)
        .await
        .context("Failed to start the remote command channel")?;
    server.set_release_notifier(remote.release_notifier()).await;

    let feed = TelemetryFeed::spawn(
        Arc::clone(server.telemetry()),
        config.server.telemetry_port,
        server.shutdown_watch(),
    )
    .await
    .context("Failed to start the telemetry feed")?;

    if args.headless {
        let mut shutdown = server.shutdown_watch();
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown requested over the remote channel");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                server.exit().await;
            }
        }
    } else {
        if let Err(e) = console::run(Arc::clone(&dispatcher)).await {
            error!("Console error: {}", e);
        }
        // Console may have ended on EOF rather than an exit command
        if !*server.shutdown_watch().borrow() {
            server.exit().await;
        }
    }

    remote.join().await;
    feed.join().await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_raises_log_level() {
        assert_eq!(log_level(false), Level::INFO);
        assert_eq!(log_level(true), Level::DEBUG);
    }
}
