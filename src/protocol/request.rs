//! Request message types

use serde::{Deserialize, Serialize};

use crate::core::types::PeerId;

/// Request messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Peers, sessions and the provisioning queue
    GetStatus,

    /// The durable credential record, without its secret
    GetStoredNetwork,

    /// Abort a peer's exchange
    CancelExchange(PeerParams),

    /// Start a fresh exchange with a connected peer
    RestartExchange(PeerParams),
}

/// Parameters naming a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerParams {
    pub peer_id: PeerId,
}

impl Request {
    /// Method name as it appears on the wire
    pub fn method(&self) -> &'static str {
        match self {
            Request::GetStatus => "get_status",
            Request::GetStoredNetwork => "get_stored_network",
            Request::CancelExchange(_) => "cancel_exchange",
            Request::RestartExchange(_) => "restart_exchange",
        }
    }
}
