//! teleod - device binding and control-loop orchestration library
//!
//! This library discovers robots and game controllers attached to a host,
//! binds controller/robot pairs into fixed-rate teleoperation control loops,
//! and republishes robot joint state to telemetry subscribers. The remote
//! message channel and the local console are both thin front-ends over the
//! same command dispatcher.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use teleod::{DaemonConfig, Dispatcher, InvocationSource, Server};
//! # use teleod::device::{DeviceEnumerator, RobotProbe};
//! # use teleod::link::{DriverRegistry, RobotConnector};
//! # fn parts() -> (Arc<dyn DeviceEnumerator>, Arc<dyn RobotProbe>, Arc<dyn RobotConnector>, Arc<DriverRegistry>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (enumerator, probe, connector, drivers) = parts();
//!     let server = Arc::new(Server::new(
//!         DaemonConfig::default(),
//!         enumerator,
//!         probe,
//!         connector,
//!         drivers,
//!     ));
//!     let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&server)));
//!
//!     // List robots, then bind robot 1 to controller 1
//!     let robots = dispatcher
//!         .dispatch("robs", &[], InvocationSource::Local)
//!         .await?;
//!     println!("robots: {:?}", robots);
//!     let args = ["1".into(), "1".into(), "GenericDriver".into()];
//!     dispatcher.dispatch("bind", &args, InvocationSource::Local).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Server**: Shared daemon state (discovery + connection registries)
//! - **Dispatcher**: Explicit command table shared by all front-ends
//! - **DiscoveryRegistry**: Generation-tagged device lists
//! - **ConnectionRegistry**: Bind/unbind and control-loop lifecycle
//! - **ControlLoopHandle**: Fixed-rate relay of controller commands
//! - **TelemetryHub**: Broadcast fanout of joint-state frames
//! - **RemoteConsole**: Newline-delimited JSON message channel over TCP

pub mod backend;
pub mod config;
pub mod console;
pub mod control_loop;
pub mod device;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod registry;
pub mod remote;
pub mod server;
pub mod telemetry;
pub mod wire;

// High-level exports for easy usage
pub use config::{ControlConfig, DaemonConfig, PublishingConfig, ServerConfig};
pub use dispatch::{Dispatcher, InvocationSource, COMMANDS};
pub use error::{Result, TeleoError};
pub use remote::RemoteConsole;
pub use server::Server;
pub use telemetry::{ConsoleTelemetry, NoOpTelemetry, TelemetryFeed, TelemetryHub, TelemetrySink};

// Core component exports for advanced usage
pub use backend::{GenericDriver, StaticEnumerator, TcpRobotProbe, TeleoRobotConnector};
pub use control_loop::ControlLoopHandle;
pub use device::{DeviceEnumerator, DeviceHandle, DeviceOrigin, RobotProbe};
pub use discovery::{DiscoveryRegistry, DiscoverySnapshot};
pub use link::{
    ControllerCommand, ControllerDriver, ControllerLink, DriverRegistry, RobotConnector,
    RobotLink,
};
pub use registry::{ConnectionInfo, ConnectionRegistry, ReleaseNotifier};
pub use telemetry::{joint_frame, TelemetryFrame, JOINTS_TOPIC};
