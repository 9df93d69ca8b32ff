//! Discovery registry
//!
//! Rescans attached devices on demand and classifies each through the robot
//! probe: compliant devices form the robot list, everything else is assumed
//! to be a controller. Virtual controllers registered over the remote
//! channel are appended after the physical ones in registration order.
//!
//! Indices are 1-based and only valid for the generation that produced
//! them; every rebuild replaces the list and its path→index map and bumps
//! the generation. Each list records the generation at which it was last
//! rebuilt, so rebuilding one list never invalidates indices issued for
//! the other. A bound device is held exclusively by its connection and
//! intentionally disappears from subsequent scans.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::device::{DeviceEnumerator, DeviceHandle, RobotProbe};
use crate::wire::display_string;

/// Result of one discovery call: a display string, the ordered path list
/// and the generation the returned indices are scoped to.
#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    pub display: String,
    pub paths: Vec<String>,
    pub generation: u64,
}

pub struct DiscoveryRegistry {
    enumerator: Arc<dyn DeviceEnumerator>,
    probe: Arc<dyn RobotProbe>,
    virtual_robot_path: String,
    robots: Vec<DeviceHandle>,
    controllers: Vec<DeviceHandle>,
    virtual_controllers: Vec<String>,
    robot_index: HashMap<String, usize>,
    controller_index: HashMap<String, usize>,
    generation: u64,
    robots_generation: u64,
    controllers_generation: u64,
}

impl DiscoveryRegistry {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        probe: Arc<dyn RobotProbe>,
        virtual_robot_path: String,
    ) -> Self {
        Self {
            enumerator,
            probe,
            virtual_robot_path,
            robots: Vec::new(),
            controllers: Vec::new(),
            virtual_controllers: Vec::new(),
            robot_index: HashMap::new(),
            controller_index: HashMap::new(),
            generation: 0,
            robots_generation: 0,
            controllers_generation: 0,
        }
    }

    /// Rescan attached devices and rebuild the robot list.
    ///
    /// The reserved virtual robot slot is probed through the same predicate
    /// because the virtual endpoint may or may not currently be reachable.
    /// Never fails; an unreachable slot is simply omitted.
    pub async fn discover_robots(&mut self) -> DiscoverySnapshot {
        let devices = self.enumerator.list();
        let results = self.classify(&devices).await;

        let mut robots: Vec<DeviceHandle> = devices
            .into_iter()
            .zip(results)
            .filter_map(|(dev, compliant)| compliant.then_some(dev))
            .collect();

        if self.probe.is_compliant(&self.virtual_robot_path).await {
            robots.push(DeviceHandle::virtual_(self.virtual_robot_path.clone()));
        }

        self.robots = robots;
        self.robot_index = Self::rebuild_map(&self.robots);
        self.generation += 1;
        self.robots_generation = self.generation;
        debug!(
            "Robot list rebuilt: {} entries (generation {})",
            self.robots.len(),
            self.generation
        );

        self.snapshot(&self.robots)
    }

    /// Rescan attached devices and rebuild the controller list.
    ///
    /// Controllers are defined negatively: every enumerated device that
    /// failed robot classification. Registered virtual controllers are
    /// appended at the tail in registration order.
    pub async fn discover_controllers(&mut self) -> DiscoverySnapshot {
        let devices = self.enumerator.list();
        let results = self.classify(&devices).await;

        let mut controllers: Vec<DeviceHandle> = devices
            .into_iter()
            .zip(results)
            .filter_map(|(dev, compliant)| (!compliant).then_some(dev))
            .collect();

        controllers.extend(
            self.virtual_controllers
                .iter()
                .map(|id| DeviceHandle::virtual_(id.clone())),
        );

        self.controllers = controllers;
        self.controller_index = Self::rebuild_map(&self.controllers);
        self.generation += 1;
        self.controllers_generation = self.generation;
        debug!(
            "Controller list rebuilt: {} entries (generation {})",
            self.controllers.len(),
            self.generation
        );

        self.snapshot(&self.controllers)
    }

    /// Add a virtual controller id. Returns false if already registered.
    /// Callers must rebuild the controller list afterwards so indices stay
    /// consistent.
    pub fn register_virtual_controller(&mut self, id: &str) -> bool {
        if self.virtual_controllers.iter().any(|v| v == id) {
            return false;
        }
        self.virtual_controllers.push(id.to_string());
        true
    }

    /// Remove a virtual controller id. Returns false if it was not
    /// registered. Same rebuild obligation as registration.
    pub fn deregister_virtual_controller(&mut self, id: &str) -> bool {
        let before = self.virtual_controllers.len();
        self.virtual_controllers.retain(|v| v != id);
        self.virtual_controllers.len() != before
    }

    pub fn is_virtual_controller(&self, id: &str) -> bool {
        self.virtual_controllers.iter().any(|v| v == id)
    }

    /// Robot path for a 1-based index, if in range
    pub fn robot_at(&self, index: usize) -> Option<&DeviceHandle> {
        (1..=self.robots.len())
            .contains(&index)
            .then(|| &self.robots[index - 1])
    }

    /// Controller path for a 1-based index, if in range
    pub fn controller_at(&self, index: usize) -> Option<&DeviceHandle> {
        (1..=self.controllers.len())
            .contains(&index)
            .then(|| &self.controllers[index - 1])
    }

    /// 1-based index for a robot path in the current generation
    pub fn robot_index_of(&self, path: &str) -> Option<usize> {
        self.robot_index.get(path).copied()
    }

    /// 1-based index for a controller path in the current generation
    pub fn controller_index_of(&self, path: &str) -> Option<usize> {
        self.controller_index.get(path).copied()
    }

    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation at which the robot list was last rebuilt
    pub fn robots_generation(&self) -> u64 {
        self.robots_generation
    }

    /// Generation at which the controller list was last rebuilt
    pub fn controllers_generation(&self) -> u64 {
        self.controllers_generation
    }

    /// Classify all devices concurrently, preserving input order.
    async fn classify(&self, devices: &[DeviceHandle]) -> Vec<bool> {
        join_all(devices.iter().map(|dev| self.probe.is_compliant(&dev.path))).await
    }

    fn rebuild_map(entries: &[DeviceHandle]) -> HashMap<String, usize> {
        entries
            .iter()
            .enumerate()
            .map(|(i, dev)| (dev.path.clone(), i + 1))
            .collect()
    }

    fn snapshot(&self, entries: &[DeviceHandle]) -> DiscoverySnapshot {
        let paths: Vec<String> = entries.iter().map(|d| d.path.clone()).collect();
        DiscoverySnapshot {
            display: display_string(&paths),
            paths,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{FixedEnumerator, SetProbe};
    use crate::device::DeviceOrigin;

    fn registry(devices: &[&str], robots: &[&str]) -> DiscoveryRegistry {
        DiscoveryRegistry::new(
            Arc::new(FixedEnumerator::new(devices)),
            Arc::new(SetProbe::new(robots)),
            "virtual".to_string(),
        )
    }

    #[tokio::test]
    async fn test_partition_robots_and_controllers() {
        let mut reg = registry(&["/dev/r1", "/dev/j1", "/dev/j2"], &["/dev/r1"]);

        let robots = reg.discover_robots().await;
        let controllers = reg.discover_controllers().await;

        assert_eq!(robots.paths, vec!["/dev/r1"]);
        assert_eq!(controllers.paths, vec!["/dev/j1", "/dev/j2"]);
        // Physical portions partition the device set
        for path in &robots.paths {
            assert!(!controllers.paths.contains(path));
        }
    }

    #[tokio::test]
    async fn test_display_strings() {
        let mut reg = registry(&["a", "b"], &["a"]);
        let robots = reg.discover_robots().await;
        assert_eq!(robots.display, "/a/");
        let controllers = reg.discover_controllers().await;
        assert_eq!(controllers.display, "/b/");
    }

    #[tokio::test]
    async fn test_virtual_robot_slot_probed() {
        let mut reg = registry(&["a"], &["a", "virtual"]);
        let robots = reg.discover_robots().await;
        assert_eq!(robots.paths, vec!["a", "virtual"]);
        assert_eq!(reg.robot_at(2).unwrap().origin, DeviceOrigin::Virtual);

        // Unreachable virtual slot is omitted
        let mut reg = registry(&["a"], &["a"]);
        let robots = reg.discover_robots().await;
        assert_eq!(robots.paths, vec!["a"]);
    }

    #[tokio::test]
    async fn test_virtual_controllers_at_tail_in_registration_order() {
        let mut reg = registry(&["j1"], &[]);
        assert!(reg.register_virtual_controller("ws-2"));
        assert!(reg.register_virtual_controller("ws-1"));
        assert!(!reg.register_virtual_controller("ws-2"));

        let controllers = reg.discover_controllers().await;
        assert_eq!(controllers.paths, vec!["j1", "ws-2", "ws-1"]);
        assert_eq!(reg.controller_index_of("ws-1"), Some(3));

        assert!(reg.deregister_virtual_controller("ws-2"));
        assert!(!reg.deregister_virtual_controller("ws-2"));
        let controllers = reg.discover_controllers().await;
        assert_eq!(controllers.paths, vec!["j1", "ws-1"]);
    }

    #[tokio::test]
    async fn test_generation_bumps_on_rebuild() {
        let mut reg = registry(&["a"], &["a"]);
        assert_eq!(reg.generation(), 0);
        let first = reg.discover_robots().await;
        let second = reg.discover_controllers().await;
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
    }

    #[tokio::test]
    async fn test_index_lookup_is_one_based() {
        let mut reg = registry(&["r", "j"], &["r"]);
        reg.discover_robots().await;
        assert!(reg.robot_at(0).is_none());
        assert_eq!(reg.robot_at(1).unwrap().path, "r");
        assert!(reg.robot_at(2).is_none());
        assert_eq!(reg.robot_index_of("r"), Some(1));
    }
}
