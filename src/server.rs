//! Server orchestrator
//!
//! Owns the discovery and connection registries behind one mutex and
//! exposes the operations both consoles dispatch into. All registry
//! mutation is serialized here; control loops never touch shared state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::device::{DeviceEnumerator, RobotProbe};
use crate::discovery::{DiscoveryRegistry, DiscoverySnapshot};
use crate::link::{DriverRegistry, RobotConnector};
use crate::registry::{ConnectionInfo, ConnectionRegistry, ReleaseNotifier};
use crate::telemetry::TelemetryHub;
use crate::{Result, TeleoError};

pub struct ServerState {
    pub discovery: DiscoveryRegistry,
    pub connections: ConnectionRegistry,
}

pub struct Server {
    state: Mutex<ServerState>,
    connector: Arc<dyn RobotConnector>,
    hub: Arc<TelemetryHub>,
    config: DaemonConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn new(
        config: DaemonConfig,
        enumerator: Arc<dyn DeviceEnumerator>,
        probe: Arc<dyn RobotProbe>,
        connector: Arc<dyn RobotConnector>,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        let hub = Arc::new(TelemetryHub::default());
        let discovery =
            DiscoveryRegistry::new(enumerator, probe, config.virtual_robot_path());
        let connections = ConnectionRegistry::new(
            Arc::clone(&connector),
            drivers,
            Arc::clone(&hub),
            Duration::from_millis(config.tick_ms()),
            config.decimal_places(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            state: Mutex::new(ServerState { discovery, connections }),
            connector,
            hub,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryHub> {
        &self.hub
    }

    /// Watch channel flipped to true once shutdown has been requested
    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub async fn set_release_notifier(&self, notifier: Arc<dyn ReleaseNotifier>) {
        self.state.lock().await.connections.set_release_notifier(notifier);
    }

    pub async fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().await
    }

    /// Rescan and rebuild the robot list. Never fails.
    pub async fn discover_robots(&self) -> DiscoverySnapshot {
        self.state.lock().await.discovery.discover_robots().await
    }

    /// Rescan and rebuild the controller list. Never fails.
    pub async fn discover_controllers(&self) -> DiscoverySnapshot {
        self.state.lock().await.discovery.discover_controllers().await
    }

    /// Fetch a robot's device-info string through a transient link.
    /// Returns the raw info string and the index it was requested for.
    pub async fn robot_info(&self, robot_index: usize) -> Result<(String, usize)> {
        let path = {
            let state = self.state.lock().await;
            if state.discovery.robot_count() == 0 {
                return Err(TeleoError::Validation(
                    "There are no robots currently listed".to_string(),
                ));
            }
            state
                .discovery
                .robot_at(robot_index)
                .map(|d| d.path.clone())
                .ok_or_else(|| {
                    TeleoError::Validation(format!(
                        "Robot index {} out of range [1, {}]",
                        robot_index,
                        state.discovery.robot_count()
                    ))
                })?
        };

        // Registry lock is released during the I/O; the link is transient
        // and never enters the connection registry.
        let mut link = self.connector.open(&path)?;
        link.connect().await?;
        let result = link.get_info().await;
        if let Err(e) = link.disconnect().await {
            warn!("Failed to close transient info link for {}: {}", path, e);
        }
        Ok((result?, robot_index))
    }

    pub async fn bind(
        &self,
        robot_index: usize,
        controller_index: usize,
        driver_name: &str,
        generation: Option<u64>,
    ) -> Result<usize> {
        let mut state = self.state.lock().await;
        let ServerState { discovery, connections } = &mut *state;
        connections
            .bind(discovery, robot_index, controller_index, driver_name, generation)
            .await
    }

    pub async fn bind_paths(
        &self,
        robot_path: &str,
        controller_path: &str,
        driver_name: &str,
    ) -> Result<usize> {
        let mut state = self.state.lock().await;
        let ServerState { discovery, connections } = &mut *state;
        connections
            .bind_paths(discovery, robot_path, controller_path, driver_name)
            .await
    }

    pub async fn unbind(&self, index: usize) -> Result<ConnectionInfo> {
        let mut state = self.state.lock().await;
        let ServerState { discovery, connections } = &mut *state;
        connections.unbind(discovery, index).await
    }

    pub async fn unbind_paths(
        &self,
        robot_path: &str,
        controller_path: &str,
    ) -> Result<ConnectionInfo> {
        let mut state = self.state.lock().await;
        let ServerState { discovery, connections } = &mut *state;
        connections.unbind_paths(discovery, robot_path, controller_path).await
    }

    pub async fn list_connections(&self) -> (String, Vec<ConnectionInfo>) {
        self.state.lock().await.connections.list()
    }

    /// Register a virtual controller and rebuild the controller list so
    /// indices stay consistent.
    pub async fn add_virtual_controller(&self, id: &str) -> DiscoverySnapshot {
        let mut state = self.state.lock().await;
        if !state.discovery.register_virtual_controller(id) {
            warn!("Virtual controller {} already registered", id);
        }
        state.discovery.discover_controllers().await
    }

    /// Deregister a virtual controller and rebuild the controller list.
    pub async fn remove_virtual_controller(&self, id: &str) -> DiscoverySnapshot {
        let mut state = self.state.lock().await;
        if !state.discovery.deregister_virtual_controller(id) {
            warn!("Virtual controller {} was not registered", id);
        }
        state.discovery.discover_controllers().await
    }

    /// Clean exit: unbind every active connection (best-effort) and flip
    /// the shutdown watch. The remote channel sends its closing
    /// notification when it observes the flip.
    pub async fn exit(&self) {
        info!("Unbinding all active connections");
        {
            let mut state = self.state.lock().await;
            let ServerState { discovery, connections } = &mut *state;
            connections.unbind_all(discovery).await;
        }
        info!("Closing server");
        let _ = self.shutdown_tx.send(true);
    }
}
