//! Default device backends
//!
//! The library core only sees the enumerator/probe/connector/driver traits;
//! this module supplies the implementations the daemon binary wires in.
//! Robots are TCP endpoints speaking a newline-delimited text protocol,
//! controllers are readable device nodes emitting wire command lines, and
//! the reserved virtual robot is an in-memory stand-in so the daemon is
//! usable without hardware attached.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::device::{DeviceEnumerator, DeviceHandle, RobotProbe};
use crate::link::{
    ControllerCommand, ControllerDriver, ControllerLink, RobotConnector, RobotLink,
};
use crate::{Result, TeleoError};

const PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Enumerator over the device paths named in the daemon config.
pub struct StaticEnumerator {
    devices: Vec<String>,
}

impl StaticEnumerator {
    pub fn new(devices: Vec<String>) -> Self {
        Self { devices }
    }
}

impl DeviceEnumerator for StaticEnumerator {
    fn list(&self) -> Vec<DeviceHandle> {
        self.devices
            .iter()
            .map(|p| DeviceHandle::physical(p))
            .collect()
    }
}

/// Robot classification by reachability: a device path is a robot if it
/// parses as a socket address and accepts a TCP connection. The reserved
/// virtual path is always compliant.
pub struct TcpRobotProbe {
    virtual_path: String,
}

impl TcpRobotProbe {
    pub fn new(virtual_path: String) -> Self {
        Self { virtual_path }
    }
}

#[async_trait]
impl RobotProbe for TcpRobotProbe {
    async fn is_compliant(&self, path: &str) -> bool {
        if path == self.virtual_path {
            return true;
        }
        if path.parse::<std::net::SocketAddr>().is_err() {
            return false;
        }
        match timeout(PROBE_TIMEOUT, TcpStream::connect(path)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", path, e);
                false
            }
            Err(_) => {
                debug!("Probe of {} timed out", path);
                false
            }
        }
    }
}

/// Opens TCP robot links, or the in-memory virtual robot for the
/// reserved virtual path.
pub struct TeleoRobotConnector {
    virtual_path: String,
}

impl TeleoRobotConnector {
    pub fn new(virtual_path: String) -> Self {
        Self { virtual_path }
    }
}

impl RobotConnector for TeleoRobotConnector {
    fn open(&self, path: &str) -> Result<Box<dyn RobotLink>> {
        if path == self.virtual_path {
            Ok(Box::new(VirtualRobot::new(6)))
        } else {
            Ok(Box::new(TcpRobot::new(path)))
        }
    }
}

/// In-memory robot holding the last commanded end-effector position as
/// its joint state.
pub struct VirtualRobot {
    joints: Vec<f64>,
}

impl VirtualRobot {
    pub fn new(dof: usize) -> Self {
        Self { joints: vec![0.0; dof] }
    }
}

#[async_trait]
impl RobotLink for VirtualRobot {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn get_info(&mut self) -> Result<String> {
        Ok(format!("model:virtual/dof:{}", self.joints.len()))
    }

    async fn set_end_effector_position(&mut self, payload: &[f64], _ack: bool) -> Result<()> {
        for (joint, value) in self.joints.iter_mut().zip(payload) {
            *joint = *value;
        }
        Ok(())
    }

    async fn get_joints(&mut self) -> Result<String> {
        let parts: Vec<String> = self
            .joints
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}:{}", i + 1, v))
            .collect();
        Ok(parts.join("/"))
    }
}

/// Robot link over a newline-delimited TCP text protocol:
/// `info` and `joints` each answer with one line, `move v1 v2 ...`
/// answers with an acknowledgment line when one is requested.
pub struct TcpRobot {
    addr: String,
    reader: Option<Lines<BufReader<OwnedReadHalf>>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpRobot {
    pub fn new(addr: &str) -> Self {
        Self { addr: addr.to_string(), reader: None, writer: None }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TeleoError::Link(format!("Robot {} not connected", self.addr)))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| TeleoError::Link(format!("Robot {} not connected", self.addr)))?;
        reader
            .next_line()
            .await?
            .ok_or_else(|| TeleoError::Link(format!("Robot {} closed the connection", self.addr)))
    }
}

#[async_trait]
impl RobotLink for TcpRobot {
    async fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TeleoError::Link(format!("Connect to {} failed: {}", self.addr, e)))?;
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half).lines());
        self.writer = Some(write_half);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        Ok(())
    }

    async fn get_info(&mut self) -> Result<String> {
        self.send_line("info").await?;
        self.read_line().await
    }

    async fn set_end_effector_position(&mut self, payload: &[f64], ack: bool) -> Result<()> {
        let values: Vec<String> = payload.iter().map(|v| v.to_string()).collect();
        self.send_line(&format!("move {}", values.join(" "))).await?;
        if ack {
            self.read_line().await?;
        }
        Ok(())
    }

    async fn get_joints(&mut self) -> Result<String> {
        self.send_line("joints").await?;
        self.read_line().await
    }
}

/// The stock controller driver. Paths that exist on the filesystem open
/// as line devices; anything else (virtual controller ids in particular)
/// opens as a permanently neutral controller.
pub struct GenericDriver;

impl ControllerDriver for GenericDriver {
    fn name(&self) -> &str {
        "GenericDriver"
    }

    fn open(&self, path: &str) -> Result<Box<dyn ControllerLink>> {
        if Path::new(path).exists() {
            Ok(Box::new(LineDeviceController::new(path)))
        } else {
            Ok(Box::new(NeutralController))
        }
    }
}

/// Controller reading wire command lines (`M3 0.1 0.2`, `MN`) from a
/// device node or FIFO. End of input and malformed lines read as neutral.
pub struct LineDeviceController {
    path: String,
    lines: Option<Lines<BufReader<File>>>,
}

impl LineDeviceController {
    pub fn new(path: &str) -> Self {
        Self { path: path.to_string(), lines: None }
    }

    fn parse(line: &str) -> ControllerCommand {
        let mut parts = line.split_whitespace();
        let Some(kind) = parts.next() else {
            return ControllerCommand::Neutral;
        };
        let mut payload = Vec::new();
        for part in parts {
            match part.parse::<f64>() {
                Ok(v) => payload.push(v),
                Err(_) => {
                    debug!("Discarding malformed controller line: {}", line);
                    return ControllerCommand::Neutral;
                }
            }
        }
        ControllerCommand::from_wire(kind, payload)
    }
}

#[async_trait]
impl ControllerLink for LineDeviceController {
    async fn connect(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| TeleoError::Link(format!("Open {} failed: {}", self.path, e)))?;
        self.lines = Some(BufReader::new(file).lines());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.lines = None;
        Ok(())
    }

    async fn read(&mut self) -> Result<ControllerCommand> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| TeleoError::Link(format!("Controller {} not connected", self.path)))?;
        match lines.next_line().await? {
            Some(line) => Ok(Self::parse(&line)),
            None => Ok(ControllerCommand::Neutral),
        }
    }
}

/// Controller that never requests motion. Backs virtual controller ids,
/// whose motion is injected upstream rather than read from a device.
pub struct NeutralController;

#[async_trait]
impl ControllerLink for NeutralController {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self) -> Result<ControllerCommand> {
        Ok(ControllerCommand::Neutral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_robot_reflects_commanded_position() {
        let mut robot = VirtualRobot::new(3);
        robot
            .set_end_effector_position(&[0.5, -0.2], true)
            .await
            .unwrap();
        assert_eq!(robot.get_joints().await.unwrap(), "1:0.5/2:-0.2/3:0");
        assert_eq!(robot.get_info().await.unwrap(), "model:virtual/dof:3");
    }

    #[tokio::test]
    async fn test_probe_accepts_virtual_and_rejects_non_address() {
        let probe = TcpRobotProbe::new("virtual".to_string());
        assert!(probe.is_compliant("virtual").await);
        assert!(!probe.is_compliant("/dev/input/js0").await);
    }

    #[tokio::test]
    async fn test_generic_driver_falls_back_to_neutral() {
        let driver = GenericDriver;
        let mut link = driver.open("no-such-device-anywhere").unwrap();
        link.connect().await.unwrap();
        assert_eq!(link.read().await.unwrap(), ControllerCommand::Neutral);
    }

    #[test]
    fn test_line_parsing() {
        assert_eq!(
            LineDeviceController::parse("M3 0.1 -0.2"),
            ControllerCommand::Move(vec![0.1, -0.2])
        );
        assert_eq!(LineDeviceController::parse("MN"), ControllerCommand::Neutral);
        assert_eq!(LineDeviceController::parse("M3 oops"), ControllerCommand::Neutral);
        assert_eq!(LineDeviceController::parse(""), ControllerCommand::Neutral);
    }

    #[tokio::test]
    async fn test_line_device_reads_from_file() {
        let path = std::env::temp_dir().join("teleod-backend-test-lines");
        tokio::fs::write(&path, "M3 0.1 0.2\nMN\n").await.unwrap();

        let mut link = LineDeviceController::new(path.to_str().unwrap());
        link.connect().await.unwrap();
        assert_eq!(
            link.read().await.unwrap(),
            ControllerCommand::Move(vec![0.1, 0.2])
        );
        assert_eq!(link.read().await.unwrap(), ControllerCommand::Neutral);
        // past end of file
        assert_eq!(link.read().await.unwrap(), ControllerCommand::Neutral);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
