//! Telemetry publishing for joint state
//!
//! Each connection publishes one frame per successful control-loop tick:
//! a topic tag followed by interleaved joint-id/value pairs, e.g.
//! `["joints", "1", "0.50", "2", "-0.20"]`. The sink trait keeps the
//! control loop decoupled from the transport; the hub fans frames out to
//! any listening simulator, fire-and-forget.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Topic tag carried as the first element of every joint frame
pub const JOINTS_TOPIC: &str = "joints";

/// One published telemetry message
pub type TelemetryFrame = Vec<String>;

/// Build a joint frame from ordered (id, formatted value) pairs.
pub fn joint_frame(pairs: &[(String, String)]) -> TelemetryFrame {
    let mut frame = Vec::with_capacity(1 + pairs.len() * 2);
    frame.push(JOINTS_TOPIC.to_string());
    for (id, value) in pairs {
        frame.push(id.clone());
        frame.push(value.clone());
    }
    frame
}

/// Per-connection publish channel
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Publish ordered joint-id/formatted-value pairs. Fire-and-forget:
    /// absent subscribers are not an error.
    async fn publish_joints(&self, pairs: &[(String, String)]) -> anyhow::Result<()>;
}

/// Sink that discards all frames
#[derive(Debug, Clone)]
pub struct NoOpTelemetry;

#[async_trait]
impl TelemetrySink for NoOpTelemetry {
    async fn publish_joints(&self, _pairs: &[(String, String)]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that prints frames to stdout as JSON, for debugging
#[derive(Debug, Clone)]
pub struct ConsoleTelemetry;

#[async_trait]
impl TelemetrySink for ConsoleTelemetry {
    async fn publish_joints(&self, pairs: &[(String, String)]) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(&joint_frame(pairs))?);
        Ok(())
    }
}

/// Fanout hub backing the simulator feed.
///
/// Connections obtain a dedicated publisher at bind time; dropping it at
/// unbind closes that connection's publish channel. Subscribers (the
/// telemetry TCP feed, tests) receive every connection's frames.
pub struct TelemetryHub {
    tx: broadcast::Sender<TelemetryFrame>,
}

impl TelemetryHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Open a dedicated publisher for one connection
    pub fn publisher(&self) -> FeedPublisher {
        FeedPublisher { tx: self.tx.clone() }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryFrame> {
        self.tx.subscribe()
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Publisher handed to one control loop
pub struct FeedPublisher {
    tx: broadcast::Sender<TelemetryFrame>,
}

#[async_trait]
impl TelemetrySink for FeedPublisher {
    async fn publish_joints(&self, pairs: &[(String, String)]) -> anyhow::Result<()> {
        let frame = joint_frame(pairs);
        // A send error only means nobody is listening right now
        if self.tx.send(frame).is_err() {
            debug!("Joint frame dropped: no telemetry subscribers");
        }
        Ok(())
    }
}

/// TCP feed streaming every published frame to each subscriber as one
/// JSON array per line. This is the surface simulators listen on.
pub struct TelemetryFeed {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TelemetryFeed {
    pub async fn spawn(
        hub: Arc<TelemetryHub>,
        port: u16,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Telemetry feed listening on {}", local_addr);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else {
                            continue;
                        };
                        debug!("Telemetry subscriber connected: {}", peer);
                        let rx = hub.subscribe();
                        let client_shutdown = shutdown.clone();
                        tokio::spawn(serve_subscriber(stream, rx, client_shutdown));
                    }
                }
            }
        });

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn serve_subscriber(
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<TelemetryFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            frame = rx.recv() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    // Slow subscriber skipped some frames; keep streaming
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Telemetry subscriber lagged by {} frames", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Ok(mut line) = serde_json::to_vec(&frame) else {
                    continue;
                };
                line.push(b'\n');
                if stream.write_all(&line).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_joint_frame_layout() {
        let pairs = vec![
            ("1".to_string(), "0.50".to_string()),
            ("2".to_string(), "-0.20".to_string()),
        ];
        assert_eq!(joint_frame(&pairs), vec!["joints", "1", "0.50", "2", "-0.20"]);
    }

    #[tokio::test]
    async fn test_hub_fanout() {
        let hub = TelemetryHub::default();
        let mut rx = hub.subscribe();
        let publisher = hub.publisher();

        publisher
            .publish_joints(&[("1".to_string(), "0.50".to_string())])
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, vec!["joints", "1", "0.50"]);
    }

    #[tokio::test]
    async fn test_feed_streams_frames_as_json_lines() {
        let hub = Arc::new(TelemetryHub::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed = TelemetryFeed::spawn(Arc::clone(&hub), 0, shutdown_rx)
            .await
            .unwrap();

        let stream = TcpStream::connect(feed.local_addr()).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        // Let the accept loop register the subscription first
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        hub.publisher()
            .publish_joints(&[("1".to_string(), "0.50".to_string())])
            .await
            .unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"["joints","1","0.50"]"#);

        shutdown_tx.send(true).unwrap();
        feed.join().await;
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let hub = TelemetryHub::default();
        let publisher = hub.publisher();
        publisher
            .publish_joints(&[("1".to_string(), "0.00".to_string())])
            .await
            .unwrap();
    }
}
