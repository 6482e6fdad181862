//! Shared node state for cross-task communication.

use clearnode_core::Address;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::commands::NodeCommand;

/// Shared state for the running node, accessible from HTTP handlers.
pub struct NodeState {
    /// Address of the broker signing key.
    pub broker: Address,
    /// When the node started.
    pub start_time: Instant,
    /// Channel to send commands to the event loop.
    pub command_tx: mpsc::Sender<NodeCommand>,
}

impl NodeState {
    pub fn new(broker: Address, command_tx: mpsc::Sender<NodeCommand>) -> Self {
        Self {
            broker,
            start_time: Instant::now(),
            command_tx,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
