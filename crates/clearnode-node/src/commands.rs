//! Commands dispatched from the HTTP API to the node event loop.

use clearnode_core::Channel;
use clearnode_settlement::CustodyEvent;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::rpc::{RpcRequest, RpcResponse};

/// A command sent from the HTTP API to the node's main event loop.
pub enum NodeCommand {
    /// Execute a signed RPC request.
    Rpc {
        request: RpcRequest,
        reply: oneshot::Sender<RpcResponse>,
    },
    /// Apply a custody-contract event. Events are applied one at a time, in arrival order.
    Custody {
        event: CustodyEvent,
        reply: oneshot::Sender<Result<EventResponse, String>>,
    },
}

/// Outcome of one custody event.
#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}
