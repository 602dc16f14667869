//! Message channels between the client and an engine.
//! - Channel: a pair of JSON message queues
//! - Connector: produces a fresh channel per session lifetime
//! - ProcessConnector: spawns an engine speaking framed DAP on stdio

use std::process::Stdio;

use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::config::AdapterConfig;
use crate::error::{DebugError, DebugResult};

use super::framing::spawn_stream_channel;

/// Bidirectional JSON message channel.
#[derive(Debug)]
pub struct Channel {
    outgoing: UnboundedSender<Value>,
    incoming: UnboundedReceiver<Value>,
}

impl Channel {
    #[must_use]
    pub fn new(outgoing: UnboundedSender<Value>, incoming: UnboundedReceiver<Value>) -> Self {
        Self { outgoing, incoming }
    }

    /// Two connected ends: whatever one end sends, the other receives.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::new(left_tx, right_rx), Self::new(right_tx, left_rx))
    }

    /// Returns `false` once the peer is gone.
    pub fn send(&self, message: Value) -> bool {
        self.outgoing.send(message).is_ok()
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.incoming.try_recv().ok()
    }

    #[must_use]
    pub fn sender(&self) -> UnboundedSender<Value> {
        self.outgoing.clone()
    }

    pub fn into_parts(self) -> (UnboundedSender<Value>, UnboundedReceiver<Value>) {
        (self.outgoing, self.incoming)
    }
}

/// Establishes the channel to an engine. Called once per session lifetime,
/// so a restart obtains a fresh channel.
pub trait Connector: Send {
    fn connect(&mut self) -> DebugResult<Channel>;
}

/// Spawns the configured engine process and frames DAP over its stdio.
#[derive(Debug)]
pub struct ProcessConnector {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl ProcessConnector {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

impl Connector for ProcessConnector {
    fn connect(&mut self) -> DebugResult<Channel> {
        if let Some(mut previous) = self.child.take() {
            debug!(command = %self.command, "killing previous engine process");
            let _ = previous.start_kill();
        }
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                DebugError::configuration(format!("failed to spawn '{}': {err}", self.command))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DebugError::configuration("engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DebugError::configuration("engine stdout unavailable"))?;
        info!(command = %self.command, pid = ?child.id(), "engine process started");
        self.child = Some(child);
        Ok(spawn_stream_channel(stdout, stdin))
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Connector, ProcessConnector};
    use crate::error::DebugError;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn pair_ends_are_cross_connected() {
        let (mut client, mut engine) = Channel::pair();
        assert!(client.send(json!({"from": "client"})));
        assert!(engine.send(json!({"from": "engine"})));

        assert_eq!(engine.recv().await, Some(json!({"from": "client"})));
        assert_eq!(client.recv().await, Some(json!({"from": "engine"})));

        drop(engine);
        assert!(!client.send(json!({})));
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_engine_binary_is_a_configuration_error() {
        let mut connector =
            ProcessConnector::new("/nonexistent/trust-debug-engine", Vec::new());
        let err = connector.connect().expect_err("spawn must fail");
        assert!(matches!(err, DebugError::Configuration(message) if message.contains("spawn")));
    }
}
