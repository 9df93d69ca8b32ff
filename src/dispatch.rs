//! Command dispatch table
//!
//! One static table maps command names to handlers shared by the local
//! console and the remote channel. Handlers receive fully populated
//! positional args (interactive argument resolution happens in the local
//! console before dispatch) plus the invocation source flag; they never
//! prompt. Unknown names are rejected explicitly.
//!
//! Outcome shape follows the server's observable behavior: bind variants
//! report failure as a normal `"false"` outcome, unbind/info variants
//! propagate an error to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::server::Server;
use crate::{Result, TeleoError};

/// Which front-end invoked the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationSource {
    Local,
    Remote,
}

impl InvocationSource {
    pub fn is_local(&self) -> bool {
        matches!(self, InvocationSource::Local)
    }
}

#[derive(Debug, Clone, Copy)]
enum Handler {
    Help,
    Info,
    Robots,
    Controllers,
    Clear,
    Bind,
    BindPaths,
    Unbind,
    UnbindPaths,
    Connections,
    Exit,
}

/// One entry of the command table
pub struct CommandEntry {
    pub name: &'static str,
    pub description: &'static str,
    handler: Handler,
}

/// The command table. Adding an entry here extends the help menu and both
/// front-ends automatically.
pub const COMMANDS: &[CommandEntry] = &[
    CommandEntry { name: "h", description: "Shows the server help", handler: Handler::Help },
    CommandEntry { name: "info", description: "Gets the robot's information", handler: Handler::Info },
    CommandEntry { name: "robs", description: "Shows connected compliant robots", handler: Handler::Robots },
    CommandEntry { name: "joys", description: "Shows connected controllers (non-compliant devices)", handler: Handler::Controllers },
    CommandEntry { name: "clear", description: "Clears the console", handler: Handler::Clear },
    CommandEntry { name: "bind", description: "Binds controller to robot (indexes)", handler: Handler::Bind },
    CommandEntry { name: "pbind", description: "Binds controller to robot (paths)", handler: Handler::BindPaths },
    CommandEntry { name: "ubind", description: "Unbinds controller and robot", handler: Handler::Unbind },
    CommandEntry { name: "pubind", description: "Unbinds controller and robot (paths)", handler: Handler::UnbindPaths },
    CommandEntry { name: "conn", description: "Lists active connections", handler: Handler::Connections },
    CommandEntry { name: "exit", description: "Closes the server", handler: Handler::Exit },
];

pub fn lookup(name: &str) -> Option<&'static CommandEntry> {
    COMMANDS.iter().find(|entry| entry.name == name)
}

pub struct Dispatcher {
    server: Arc<Server>,
}

impl Dispatcher {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Dispatch one command. `args` must be fully populated: handlers fail
    /// fast on missing or malformed arguments regardless of source.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &[String],
        source: InvocationSource,
    ) -> Result<Vec<String>> {
        let entry = lookup(name)
            .ok_or_else(|| TeleoError::Validation(format!("Command not recognized: {}", name)))?;
        debug!("Dispatching {} ({:?}, {} args)", name, source, args.len());

        match entry.handler {
            Handler::Help => Ok(COMMANDS
                .iter()
                .map(|e| format!("{}\t:\t{}", e.name, e.description))
                .collect()),

            Handler::Robots => {
                let snapshot = self.server.discover_robots().await;
                let mut out = vec![snapshot.display];
                out.extend(snapshot.paths);
                Ok(out)
            }

            Handler::Controllers => {
                let snapshot = self.server.discover_controllers().await;
                let mut out = vec![snapshot.display];
                out.extend(snapshot.paths);
                Ok(out)
            }

            Handler::Info => {
                let index = parse_index(args, 0, "robot index")?;
                let (info, index) = self.server.robot_info(index).await?;
                Ok(vec![info, index.to_string()])
            }

            Handler::Bind => {
                let robot_index = parse_index(args, 0, "robot index")?;
                let controller_index = parse_index(args, 1, "controller index")?;
                let driver = required_arg(args, 2, "driver name")?;
                let generation = match args.get(3) {
                    Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                        TeleoError::Validation(format!("Malformed generation: {}", raw))
                    })?),
                    None => None,
                };
                match self
                    .server
                    .bind(robot_index, controller_index, driver, generation)
                    .await
                {
                    Ok(_) => Ok(vec!["true".to_string()]),
                    Err(e) => {
                        warn!("Bind failed: {}", e);
                        Ok(vec!["false".to_string()])
                    }
                }
            }

            Handler::BindPaths => {
                let robot_path = required_arg(args, 0, "robot path")?;
                let controller_path = required_arg(args, 1, "controller path")?;
                let driver = required_arg(args, 2, "driver name")?;
                match self.server.bind_paths(robot_path, controller_path, driver).await {
                    Ok(_) => Ok(vec!["true".to_string()]),
                    Err(e) => {
                        warn!("Bind failed: {}", e);
                        Ok(vec!["false".to_string()])
                    }
                }
            }

            Handler::Unbind => {
                let index = parse_index(args, 0, "connection index")?;
                self.server.unbind(index).await?;
                Ok(vec!["true".to_string()])
            }

            Handler::UnbindPaths => {
                let robot_path = required_arg(args, 0, "robot path")?;
                let controller_path = required_arg(args, 1, "controller path")?;
                self.server.unbind_paths(robot_path, controller_path).await?;
                Ok(vec!["true".to_string()])
            }

            Handler::Connections => {
                let (display, conns) = self.server.list_connections().await;
                let mut out = vec![display];
                out.extend(
                    conns
                        .iter()
                        .map(|c| format!("{}&{}", c.robot_path, c.controller_path)),
                );
                Ok(out)
            }

            Handler::Clear => Ok(vec!["true".to_string()]),

            Handler::Exit => {
                self.server.exit().await;
                Ok(vec!["true".to_string()])
            }
        }
    }
}

fn required_arg<'a>(args: &'a [String], position: usize, what: &str) -> Result<&'a str> {
    args.get(position)
        .map(|s| s.as_str())
        .ok_or_else(|| TeleoError::Validation(format!("Missing argument: {}", what)))
}

fn parse_index(args: &[String], position: usize, what: &str) -> Result<usize> {
    let raw = required_arg(args, position, what)?;
    raw.parse::<usize>()
        .map_err(|_| TeleoError::Validation(format!("Malformed {}: {}", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::test_server;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn dispatcher() -> Dispatcher {
        let (server, _connector) = test_server(&["/dev/r1", "/dev/j1"], &["/dev/r1"]);
        Dispatcher::new(server)
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let d = dispatcher().await;
        assert!(matches!(
            d.dispatch("nope", &[], InvocationSource::Remote).await,
            Err(TeleoError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_help_lists_every_command() {
        let d = dispatcher().await;
        let lines = d.dispatch("h", &[], InvocationSource::Local).await.unwrap();
        assert_eq!(lines.len(), COMMANDS.len());
        assert!(lines[0].starts_with("h\t"));
    }

    #[tokio::test]
    async fn test_discover_then_bind_then_conn_then_ubind() {
        let d = dispatcher().await;

        let robs = d.dispatch("robs", &[], InvocationSource::Remote).await.unwrap();
        assert_eq!(robs, vec!["//dev/r1/", "/dev/r1"]);
        let joys = d.dispatch("joys", &[], InvocationSource::Remote).await.unwrap();
        assert_eq!(joys, vec!["//dev/j1/", "/dev/j1"]);

        let bound = d
            .dispatch("bind", &args(&["1", "1", "GenericDriver"]), InvocationSource::Remote)
            .await
            .unwrap();
        assert_eq!(bound, vec!["true"]);

        let conns = d.dispatch("conn", &[], InvocationSource::Remote).await.unwrap();
        assert_eq!(conns, vec!["//dev/r1&/dev/j1/", "/dev/r1&/dev/j1"]);

        let unbound = d
            .dispatch("ubind", &args(&["1"]), InvocationSource::Remote)
            .await
            .unwrap();
        assert_eq!(unbound, vec!["true"]);

        let conns = d.dispatch("conn", &[], InvocationSource::Remote).await.unwrap();
        assert_eq!(conns, vec!["/"]);
    }

    #[tokio::test]
    async fn test_bind_failure_is_false_outcome() {
        let d = dispatcher().await;
        d.dispatch("robs", &[], InvocationSource::Remote).await.unwrap();
        d.dispatch("joys", &[], InvocationSource::Remote).await.unwrap();

        // Out-of-range index is a "false" outcome, not an error frame
        let out = d
            .dispatch("bind", &args(&["0", "1", "GenericDriver"]), InvocationSource::Remote)
            .await
            .unwrap();
        assert_eq!(out, vec!["false"]);
        let out = d
            .dispatch("bind", &args(&["9", "1", "GenericDriver"]), InvocationSource::Remote)
            .await
            .unwrap();
        assert_eq!(out, vec!["false"]);
    }

    #[tokio::test]
    async fn test_missing_args_fail_fast() {
        let d = dispatcher().await;
        assert!(matches!(
            d.dispatch("bind", &args(&["1"]), InvocationSource::Remote).await,
            Err(TeleoError::Validation(_))
        ));
        assert!(matches!(
            d.dispatch("ubind", &[], InvocationSource::Remote).await,
            Err(TeleoError::Validation(_))
        ));
        assert!(matches!(
            d.dispatch("info", &args(&["one"]), InvocationSource::Remote).await,
            Err(TeleoError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_generation_bind_is_false_outcome() {
        let d = dispatcher().await;
        let robs = d.dispatch("robs", &[], InvocationSource::Remote).await.unwrap();
        assert!(!robs.is_empty());
        d.dispatch("joys", &[], InvocationSource::Remote).await.unwrap();

        // The controller list was rebuilt after the generation robs
        // returned, so that one no longer covers both lists
        let out = d
            .dispatch(
                "bind",
                &args(&["1", "1", "GenericDriver", "1"]),
                InvocationSource::Remote,
            )
            .await
            .unwrap();
        assert_eq!(out, vec!["false"]);

        // The generation of the latest discovery response is accepted
        let out = d
            .dispatch(
                "bind",
                &args(&["1", "1", "GenericDriver", "2"]),
                InvocationSource::Remote,
            )
            .await
            .unwrap();
        assert_eq!(out, vec!["true"]);
    }

    #[tokio::test]
    async fn test_exit_triggers_shutdown() {
        let d = dispatcher().await;
        let mut watch = d.server().shutdown_watch();
        let out = d.dispatch("exit", &[], InvocationSource::Local).await.unwrap();
        assert_eq!(out, vec!["true"]);
        assert!(*watch.borrow_and_update());
    }
}
