//! Robot and controller link capabilities
//!
//! Links are the consumed wire-protocol surfaces: the daemon never decodes
//! raw device reports itself. A robot link is opened uniformly from a path;
//! a controller link is opened through a driver selected by name at bind
//! time. Both are owned exclusively by the control loop of one connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{Result, TeleoError};

/// Wire kind for the neutral/stop controller command
pub const NEUTRAL_KIND: &str = "MN";
/// Wire kind for the move controller command
pub const MOVE_KIND: &str = "M3";

/// Structured command decoded from one controller read
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    /// Neutral/stop: no motion requested this tick
    Neutral,
    /// Move the end effector to the given position
    Move(Vec<f64>),
    /// Anything else the driver reports; currently ignored
    Other(String),
}

impl ControllerCommand {
    pub fn from_wire(kind: &str, payload: Vec<f64>) -> Self {
        match kind {
            NEUTRAL_KIND => ControllerCommand::Neutral,
            MOVE_KIND => ControllerCommand::Move(payload),
            other => ControllerCommand::Other(other.to_string()),
        }
    }
}

/// Link to one compliant robot
#[async_trait]
pub trait RobotLink: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    /// Device info string, decodable with [`crate::wire::decode_info`]
    async fn get_info(&mut self) -> Result<String>;
    /// Forward an end-effector position; `ack` waits for acknowledgment
    async fn set_end_effector_position(&mut self, payload: &[f64], ack: bool) -> Result<()>;
    /// Joint state string, decodable with [`crate::wire::decode_joints`]
    async fn get_joints(&mut self) -> Result<String>;
}

/// Link to one controller (physical or virtual)
#[async_trait]
pub trait ControllerLink: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn read(&mut self) -> Result<ControllerCommand>;
}

/// Opens robot links from device paths
pub trait RobotConnector: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn RobotLink>>;
}

/// Controller driver, selected by name at bind time
pub trait ControllerDriver: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self, path: &str) -> Result<Box<dyn ControllerLink>>;
}

/// Registry of controller drivers, looked up by the driver-name string
/// supplied with a bind request.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ControllerDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    pub fn register(&mut self, driver: Arc<dyn ControllerDriver>) {
        debug!("Registered controller driver: {}", driver.name());
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn open(&self, driver_name: &str, path: &str) -> Result<Box<dyn ControllerLink>> {
        let driver = self
            .drivers
            .get(driver_name)
            .ok_or_else(|| TeleoError::Driver(driver_name.to_string()))?;
        driver.open(path)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Robot link that records position commands and serves a fixed joints
    /// string. Shared state lets tests inspect calls after the loop owns
    /// the boxed link.
    #[derive(Default)]
    pub struct RobotProbeState {
        pub connected: AtomicBool,
        pub position_sets: Mutex<Vec<Vec<f64>>>,
        pub joints_reads: AtomicUsize,
    }

    pub struct RecordingRobot {
        pub state: Arc<RobotProbeState>,
        pub joints: String,
        pub info: String,
    }

    impl RecordingRobot {
        pub fn new(state: Arc<RobotProbeState>, joints: &str) -> Self {
            Self {
                state,
                joints: joints.to_string(),
                info: "model:mock/dof:2".to_string(),
            }
        }
    }

    #[async_trait]
    impl RobotLink for RecordingRobot {
        async fn connect(&mut self) -> Result<()> {
            self.state.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.state.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn get_info(&mut self) -> Result<String> {
            Ok(self.info.clone())
        }

        async fn set_end_effector_position(&mut self, payload: &[f64], _ack: bool) -> Result<()> {
            self.state.position_sets.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn get_joints(&mut self) -> Result<String> {
            self.state.joints_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.joints.clone())
        }
    }

    /// Controller that replays a scripted command sequence, repeating the
    /// last command once the script is exhausted.
    pub struct ScriptedController {
        script: Mutex<Vec<ControllerCommand>>,
        last: Mutex<ControllerCommand>,
    }

    impl ScriptedController {
        pub fn new(script: Vec<ControllerCommand>) -> Self {
            Self {
                script: Mutex::new(script),
                last: Mutex::new(ControllerCommand::Neutral),
            }
        }
    }

    #[async_trait]
    impl ControllerLink for ScriptedController {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn read(&mut self) -> Result<ControllerCommand> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(self.last.lock().unwrap().clone())
            } else {
                let cmd = script.remove(0);
                *self.last.lock().unwrap() = cmd.clone();
                Ok(cmd)
            }
        }
    }

    #[test]
    fn test_command_from_wire() {
        assert_eq!(ControllerCommand::from_wire("MN", vec![]), ControllerCommand::Neutral);
        assert_eq!(
            ControllerCommand::from_wire("M3", vec![1.0, 2.0]),
            ControllerCommand::Move(vec![1.0, 2.0])
        );
        assert_eq!(
            ControllerCommand::from_wire("XX", vec![]),
            ControllerCommand::Other("XX".to_string())
        );
    }
}
