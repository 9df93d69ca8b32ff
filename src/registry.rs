//! Connection registry
//!
//! Tracks active robot/controller bindings and enforces one-device-one-
//! connection. A successful bind opens both links and a dedicated publish
//! channel and starts the control loop; unbind stops the loop and releases
//! robot link, controller link and publish channel together. Teardown is
//! best-effort: a failing close step is logged and never leaves a dangling
//! registry slot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::control_loop::ControlLoopHandle;
use crate::discovery::DiscoveryRegistry;
use crate::link::{DriverRegistry, RobotConnector};
use crate::telemetry::TelemetryHub;
use crate::wire::display_string;
use crate::{Result, TeleoError};

/// Notifies the remote channel that a controller it manages was released
pub trait ReleaseNotifier: Send + Sync {
    fn notify_released(&self, controller_id: &str);
}

/// One active binding
pub struct Connection {
    pub robot_path: String,
    pub controller_path: String,
    pub driver_name: String,
    loop_handle: ControlLoopHandle,
}

/// Read-only view of a connection, for listings
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub robot_path: String,
    pub controller_path: String,
    pub driver_name: String,
}

pub struct ConnectionRegistry {
    connector: Arc<dyn RobotConnector>,
    drivers: Arc<DriverRegistry>,
    hub: Arc<TelemetryHub>,
    notifier: Option<Arc<dyn ReleaseNotifier>>,
    tick: Duration,
    decimal_places: u32,
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new(
        connector: Arc<dyn RobotConnector>,
        drivers: Arc<DriverRegistry>,
        hub: Arc<TelemetryHub>,
        tick: Duration,
        decimal_places: u32,
    ) -> Self {
        Self {
            connector,
            drivers,
            hub,
            notifier: None,
            tick,
            decimal_places,
            connections: Vec::new(),
        }
    }

    pub fn set_release_notifier(&mut self, notifier: Arc<dyn ReleaseNotifier>) {
        self.notifier = Some(notifier);
    }

    /// Bind by 1-based indices into the current discovery lists.
    ///
    /// When `generation` is supplied it must be at least as new as both
    /// lists' build generations, so passing the generation of the latest
    /// discovery response validates indices from the usual robots-then-
    /// controllers sequence. A stale generation is rejected before any
    /// validation against shifted indices. No state is mutated on any
    /// failure path. Returns the 1-based index of the new connection.
    pub async fn bind(
        &mut self,
        discovery: &DiscoveryRegistry,
        robot_index: usize,
        controller_index: usize,
        driver_name: &str,
        generation: Option<u64>,
    ) -> Result<usize> {
        if let Some(requested) = generation {
            let current = discovery
                .robots_generation()
                .max(discovery.controllers_generation());
            if requested < discovery.robots_generation()
                || requested < discovery.controllers_generation()
            {
                return Err(TeleoError::StaleGeneration { requested, current });
            }
        }

        let robot_path = discovery
            .robot_at(robot_index)
            .map(|d| d.path.clone())
            .ok_or_else(|| {
                TeleoError::Validation(format!(
                    "Robot index {} out of range [1, {}]",
                    robot_index,
                    discovery.robot_count()
                ))
            })?;
        let controller_path = discovery
            .controller_at(controller_index)
            .map(|d| d.path.clone())
            .ok_or_else(|| {
                TeleoError::Validation(format!(
                    "Controller index {} out of range [1, {}]",
                    controller_index,
                    discovery.controller_count()
                ))
            })?;

        for conn in &self.connections {
            if conn.robot_path == robot_path {
                return Err(TeleoError::Exclusivity(robot_path));
            }
            if conn.controller_path == controller_path {
                return Err(TeleoError::Exclusivity(controller_path));
            }
        }

        let mut robot = self.connector.open(&robot_path)?;
        let mut controller = self.drivers.open(driver_name, &controller_path)?;

        robot.connect().await?;
        if let Err(e) = controller.connect().await {
            // Roll back the robot link so a half-open bind leaves nothing held
            if let Err(close_err) = robot.disconnect().await {
                warn!("Failed to roll back robot link: {}", close_err);
            }
            return Err(e);
        }

        let sink = Box::new(self.hub.publisher());
        let loop_handle =
            ControlLoopHandle::spawn(robot, controller, sink, self.tick, self.decimal_places);

        self.connections.push(Connection {
            robot_path: robot_path.clone(),
            controller_path: controller_path.clone(),
            driver_name: driver_name.to_string(),
            loop_handle,
        });

        info!(
            "Bound robot ({}) with controller ({}), connection index {}",
            robot_path,
            controller_path,
            self.connections.len()
        );
        Ok(self.connections.len())
    }

    /// Bind by device paths, resolved through the current path-index maps.
    /// Callers must discover first; unknown paths are a validation failure.
    pub async fn bind_paths(
        &mut self,
        discovery: &DiscoveryRegistry,
        robot_path: &str,
        controller_path: &str,
        driver_name: &str,
    ) -> Result<usize> {
        let robot_index = discovery
            .robot_index_of(robot_path)
            .ok_or_else(|| TeleoError::Validation(format!("Unknown robot path: {}", robot_path)))?;
        let controller_index = discovery.controller_index_of(controller_path).ok_or_else(|| {
            TeleoError::Validation(format!("Unknown controller path: {}", controller_path))
        })?;
        self.bind(discovery, robot_index, controller_index, driver_name, None)
            .await
    }

    /// Unbind by 1-based connection index.
    pub async fn unbind(&mut self, discovery: &DiscoveryRegistry, index: usize) -> Result<ConnectionInfo> {
        if index < 1 || index > self.connections.len() {
            return Err(TeleoError::Validation(format!(
                "Connection index {} out of range [1, {}]",
                index,
                self.connections.len()
            )));
        }

        let conn = self.connections.remove(index - 1);
        let released = ConnectionInfo {
            robot_path: conn.robot_path,
            controller_path: conn.controller_path,
            driver_name: conn.driver_name,
        };

        // Stops the loop; the task closes both links and the publish
        // channel, logging any individual close failures.
        conn.loop_handle.stop().await;

        if discovery.is_virtual_controller(&released.controller_path) {
            if let Some(notifier) = &self.notifier {
                notifier.notify_released(&released.controller_path);
            }
        }

        info!(
            "Unbound robot ({}) and controller ({})",
            released.robot_path, released.controller_path
        );
        Ok(released)
    }

    /// Unbind by the (robot, controller) path pair.
    pub async fn unbind_paths(
        &mut self,
        discovery: &DiscoveryRegistry,
        robot_path: &str,
        controller_path: &str,
    ) -> Result<ConnectionInfo> {
        let index = self
            .connections
            .iter()
            .position(|c| c.robot_path == robot_path && c.controller_path == controller_path)
            .map(|i| i + 1)
            .ok_or_else(|| {
                TeleoError::Validation(format!(
                    "No connection for pair {} & {}",
                    robot_path, controller_path
                ))
            })?;
        self.unbind(discovery, index).await
    }

    /// Unbind every connection in reverse order, continuing on failures.
    pub async fn unbind_all(&mut self, discovery: &DiscoveryRegistry) {
        for index in (1..=self.connections.len()).rev() {
            if let Err(e) = self.unbind(discovery, index).await {
                warn!("Unbind of connection {} failed: {}", index, e);
            }
        }
    }

    /// Read-only connection listing; never fails.
    pub fn list(&self) -> (String, Vec<ConnectionInfo>) {
        let infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|c| ConnectionInfo {
                robot_path: c.robot_path.clone(),
                controller_path: c.controller_path.clone(),
                driver_name: c.driver_name.clone(),
            })
            .collect();
        let display = display_string(
            infos
                .iter()
                .map(|c| format!("{}&{}", c.robot_path, c.controller_path)),
        );
        (display, infos)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
