//! Device model and the consumed enumeration/classification capabilities
//!
//! Enumeration and classification of attached devices are external
//! collaborators. The daemon only consumes them through the two traits
//! below; tests substitute in-memory implementations.

use async_trait::async_trait;

/// Where a device handle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrigin {
    Physical,
    Virtual,
}

/// Opaque device identifier produced by enumeration or virtual registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub path: String,
    pub origin: DeviceOrigin,
}

impl DeviceHandle {
    pub fn physical(path: impl Into<String>) -> Self {
        Self { path: path.into(), origin: DeviceOrigin::Physical }
    }

    pub fn virtual_(path: impl Into<String>) -> Self {
        Self { path: path.into(), origin: DeviceOrigin::Virtual }
    }
}

/// Enumerates currently attached physical devices.
///
/// A bound device is held exclusively by its connection and intentionally
/// does not appear in subsequent enumerations.
pub trait DeviceEnumerator: Send + Sync {
    fn list(&self) -> Vec<DeviceHandle>;
}

/// Classification predicate for the robot wire protocol.
///
/// `is_compliant` never fails: any internal protocol error resolves to
/// `false`. Callers evaluate all devices concurrently and must preserve
/// the input order because list indices are assigned by scan order.
#[async_trait]
pub trait RobotProbe: Send + Sync {
    async fn is_compliant(&self, path: &str) -> bool;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fixed device list for tests
    pub struct FixedEnumerator {
        pub devices: Mutex<Vec<DeviceHandle>>,
    }

    impl FixedEnumerator {
        pub fn new(paths: &[&str]) -> Self {
            Self {
                devices: Mutex::new(paths.iter().map(|p| DeviceHandle::physical(*p)).collect()),
            }
        }
    }

    impl DeviceEnumerator for FixedEnumerator {
        fn list(&self) -> Vec<DeviceHandle> {
            self.devices.lock().unwrap().clone()
        }
    }

    /// Probe that recognizes a fixed set of robot paths
    pub struct SetProbe {
        robots: HashSet<String>,
    }

    impl SetProbe {
        pub fn new(robot_paths: &[&str]) -> Self {
            Self { robots: robot_paths.iter().map(|p| p.to_string()).collect() }
        }
    }

    #[async_trait]
    impl RobotProbe for SetProbe {
        async fn is_compliant(&self, path: &str) -> bool {
            self.robots.contains(path)
        }
    }
}
