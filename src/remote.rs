//! Remote command channel
//!
//! TCP front-end carrying one JSON array per line. Requests are
//! `[senderId, commandName, ...args]`; normal responses echo the sender id
//! and command name followed by the result elements, errors collapse to
//! `[senderId, commandName, "error"]`. The reserved `addVirtualJoy` /
//! `delVirtualJoy` commands bypass the dispatch table, mutate the virtual
//! controller set and always acknowledge `"true"`.
//!
//! Out-of-band frames (controller release notifications, the one-shot
//! `closing` notification at shutdown) are pushed to every connected peer.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, InvocationSource};
use crate::registry::ReleaseNotifier;

/// Running remote console server
pub struct RemoteConsole {
    outbound: broadcast::Sender<Value>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RemoteConsole {
    /// Bind the listener and start serving. The server drains when the
    /// dispatcher's shutdown watch flips, sending each peer one
    /// `[null, "closing", null]` notification first.
    pub async fn spawn(dispatcher: Arc<Dispatcher>, port: u16) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let (outbound, _) = broadcast::channel(32);
        let shutdown = dispatcher.server().shutdown_watch();

        info!("Remote console listening on {}", local_addr);

        let accept_outbound = outbound.clone();
        let task = tokio::spawn(async move {
            let mut shutdown_rx = shutdown.clone();
            loop {
                select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Remote console peer connected: {}", peer);
                            let dispatcher = Arc::clone(&dispatcher);
                            let outbound_rx = accept_outbound.subscribe();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                serve_peer(stream, dispatcher, outbound_rx, shutdown).await;
                                debug!("Remote console peer disconnected: {}", peer);
                            });
                        }
                        Err(e) => {
                            warn!("Remote console accept failed: {}", e);
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Remote console stopped");
        });

        Ok(Self { outbound, local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle used by the connection registry to announce releases
    pub fn release_notifier(&self) -> Arc<dyn ReleaseNotifier> {
        Arc::new(RemoteReleaseNotifier { outbound: self.outbound.clone() })
    }

    /// Wait for the accept loop to finish after shutdown
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

struct RemoteReleaseNotifier {
    outbound: broadcast::Sender<Value>,
}

impl ReleaseNotifier for RemoteReleaseNotifier {
    fn notify_released(&self, controller_id: &str) {
        // Fire-and-forget: no connected peer is not an error
        let _ = self.outbound.send(json!([controller_id, "ubind", "true"]));
    }
}

async fn serve_peer(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    mut outbound_rx: broadcast::Receiver<Value>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(response) = handle_request(&dispatcher, &line).await {
                        if write_frame(&mut writer, &response).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Remote console read failed: {}", e);
                    break;
                }
            },
            frame = outbound_rx.recv() => {
                if let Ok(frame) = frame {
                    if write_frame(&mut writer, &frame).await.is_err() {
                        break;
                    }
                }
            },
            _ = shutdown_rx.changed() => {
                let _ = write_frame(&mut writer, &json!([null, "closing", null])).await;
                break;
            }
        }
    }
}

async fn write_frame(
    writer: &mut (impl AsyncWriteExt + Unpin),
    frame: &Value,
) -> std::io::Result<()> {
    let mut buf = frame.to_string().into_bytes();
    buf.push(b'\n');
    writer.write_all(&buf).await
}

/// Process one request line. Returns the response frame, or None if the
/// line was not a well-formed request.
async fn handle_request(dispatcher: &Dispatcher, line: &str) -> Option<Value> {
    let frame: Value = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Malformed remote request: {}", e);
            return None;
        }
    };
    let parts = frame.as_array()?;
    if parts.len() < 2 {
        warn!("Short remote request: {}", line);
        return None;
    }

    let sender_id = value_to_string(&parts[0]);
    let command = value_to_string(&parts[1]);
    let args: Vec<String> = parts[2..].iter().map(value_to_string).collect();
    debug!("Remote request: {} {} ({} args)", sender_id, command, args.len());

    // Virtual controller management bypasses the dispatch table; the
    // sender id doubles as the controller id.
    match command.as_str() {
        "addVirtualJoy" => {
            dispatcher.server().add_virtual_controller(&sender_id).await;
            return Some(json!([sender_id, command, "true"]));
        }
        "delVirtualJoy" => {
            dispatcher.server().remove_virtual_controller(&sender_id).await;
            return Some(json!([sender_id, command, "true"]));
        }
        _ => {}
    }

    match dispatcher.dispatch(&command, &args, InvocationSource::Remote).await {
        Ok(result) => {
            let mut response = vec![Value::String(sender_id), Value::String(command)];
            response.extend(result.into_iter().map(Value::String));
            Some(Value::Array(response))
        }
        Err(e) => {
            warn!("Remote command {} failed: {}", command, e);
            Some(json!([sender_id, command, "error"]))
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::test_server;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::{timeout, Duration};

    async fn setup() -> (Arc<Dispatcher>, RemoteConsole) {
        let (server, _connector) = test_server(&["/dev/r1", "/dev/j1"], &["/dev/r1"]);
        let dispatcher = Arc::new(Dispatcher::new(server));
        let console = RemoteConsole::spawn(Arc::clone(&dispatcher), 0).await.unwrap();
        (dispatcher, console)
    }

    struct Peer {
        writer: tokio::net::tcp::OwnedWriteHalf,
        lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    }

    async fn connect(console: &RemoteConsole) -> Peer {
        let stream = TcpStream::connect(console.local_addr()).await.unwrap();
        let (reader, writer) = stream.into_split();
        Peer { writer, lines: BufReader::new(reader).lines() }
    }

    impl Peer {
        async fn send(&mut self, request: Value) {
            let mut buf = request.to_string().into_bytes();
            buf.push(b'\n');
            self.writer.write_all(&buf).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn roundtrip(&mut self, request: Value) -> Value {
            self.send(request).await;
            self.recv().await
        }
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (_dispatcher, console) = setup().await;
        let mut peer = connect(&console).await;

        let response = peer.roundtrip(json!(["ws-1", "robs"])).await;
        assert_eq!(response, json!(["ws-1", "robs", "//dev/r1/", "/dev/r1"]));
    }

    #[tokio::test]
    async fn test_unknown_command_error_frame() {
        let (_dispatcher, console) = setup().await;
        let mut peer = connect(&console).await;

        let response = peer.roundtrip(json!(["ws-1", "frobnicate"])).await;
        assert_eq!(response, json!(["ws-1", "frobnicate", "error"]));
    }

    #[tokio::test]
    async fn test_virtual_controller_add_and_remove() {
        let (dispatcher, console) = setup().await;
        let mut peer = connect(&console).await;

        let response = peer.roundtrip(json!(["ws-9", "addVirtualJoy"])).await;
        assert_eq!(response, json!(["ws-9", "addVirtualJoy", "true"]));

        let controllers = dispatcher.server().discover_controllers().await;
        assert_eq!(controllers.paths, vec!["/dev/j1", "ws-9"]);

        let response = peer.roundtrip(json!(["ws-9", "delVirtualJoy"])).await;
        assert_eq!(response, json!(["ws-9", "delVirtualJoy", "true"]));

        let controllers = dispatcher.server().discover_controllers().await;
        assert_eq!(controllers.paths, vec!["/dev/j1"]);
    }

    #[tokio::test]
    async fn test_closing_notification_on_exit() {
        let (dispatcher, console) = setup().await;
        let mut peer = connect(&console).await;
        // Let the accept loop register the peer before exiting
        tokio::time::sleep(Duration::from_millis(50)).await;

        dispatcher.server().exit().await;

        assert_eq!(peer.recv().await, json!([null, "closing", null]));
        console.join().await;
    }

    #[tokio::test]
    async fn test_release_notification_reaches_peer() {
        let (_dispatcher, console) = setup().await;
        let mut peer = connect(&console).await;
        // Give the accept loop a moment to register the peer
        tokio::time::sleep(Duration::from_millis(50)).await;

        console.release_notifier().notify_released("ws-3");

        assert_eq!(peer.recv().await, json!(["ws-3", "ubind", "true"]));
    }
}
