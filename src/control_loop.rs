//! Per-connection control loop
//!
//! One periodic task per connection bridging its controller and robot.
//! Each tick runs a strict 4-stage pipeline: read the controller command,
//! forward a move to the robot (awaiting ack), read joint state, publish
//! one telemetry frame. A stage failure aborts only the current tick; the
//! loop stops only on explicit unbind.
//!
//! Ticks are single-flight: the pipeline is awaited inside the loop body
//! and missed ticks are skipped, so a slow pipeline can delay but never
//! overlap its successor.

use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::link::{ControllerCommand, ControllerLink, RobotLink};
use crate::telemetry::TelemetrySink;
use crate::wire::{decode_joints, format_joint_value};
use crate::Result;

/// Handle to one running control loop
pub struct ControlLoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControlLoopHandle {
    /// Spawn the loop for an already-connected robot/controller pair.
    /// The task takes ownership of both links and the publish channel and
    /// releases them together when stopped.
    pub fn spawn(
        mut robot: Box<dyn RobotLink>,
        mut controller: Box<dyn ControllerLink>,
        sink: Box<dyn TelemetrySink>,
        period: Duration,
        decimal_places: u32,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = run_tick(robot.as_mut(), controller.as_mut(), sink.as_ref(), decimal_places).await {
                            debug!("Tick aborted: {}", e);
                        }
                    }
                }
            }

            // Scoped teardown: links and publish channel go together,
            // best-effort so one failure never blocks the others.
            if let Err(e) = robot.disconnect().await {
                warn!("Failed to close robot link: {}", e);
            }
            if let Err(e) = controller.disconnect().await {
                warn!("Failed to close controller link: {}", e);
            }
            drop(sink);
            info!("Control loop stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the loop and wait for its teardown to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Control loop task join failed: {}", e);
        }
    }
}

/// One execution of the 4-stage pipeline.
///
/// A neutral command skips only the move-send stage: joint state is still
/// read and published. Unknown command kinds are ignored the same way.
async fn run_tick(
    robot: &mut dyn RobotLink,
    controller: &mut dyn ControllerLink,
    sink: &dyn TelemetrySink,
    decimal_places: u32,
) -> Result<()> {
    let command = controller.read().await?;
    debug!("Controller command: {:?}", command);

    match command {
        ControllerCommand::Move(payload) => {
            robot.set_end_effector_position(&payload, true).await?;
            debug!("Position ack received");
        }
        ControllerCommand::Neutral => {}
        ControllerCommand::Other(kind) => {
            debug!("Ignoring controller command kind: {}", kind);
        }
    }

    let raw = robot.get_joints().await?;
    let joints = decode_joints(&raw)?;
    let pairs: Vec<(String, String)> = joints
        .into_iter()
        .map(|(id, value)| (id, format_joint_value(value, decimal_places)))
        .collect();

    sink.publish_joints(&pairs)
        .await
        .map_err(|e| crate::TeleoError::Link(format!("Publish failed: {}", e)))?;

    Ok(())
}
