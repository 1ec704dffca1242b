//! Response message types

use serde::Serialize;

use crate::core::{
    dispatcher::StatusSnapshot,
    types::{PeerId, StoredCredentialRecord},
};

/// Response messages from server to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    /// Status response
    Status(StatusResponse),

    /// Stored network response
    StoredNetwork(StoredNetworkResponse),

    /// Command accepted
    Ack(AckResponse),
}

/// Response for get_status request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Response for get_stored_network request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredNetworkResponse {
    pub status: String,
    /// `None` when nothing has been stored yet
    pub network: Option<StoredNetwork>,
}

/// What the store holds, minus the secret
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredNetwork {
    pub network_name: String,
    pub open: bool,
    pub captured_from: PeerId,
    /// Unix seconds
    pub accepted_at: u64,
    pub verified: bool,
}

/// Response for cancel_exchange and restart_exchange requests
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AckResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok(snapshot: StatusSnapshot) -> Self {
        Self {
            status: "ok".to_string(),
            snapshot,
        }
    }
}

impl StoredNetworkResponse {
    pub fn ok(record: Option<&StoredCredentialRecord>) -> Self {
        Self {
            status: "ok".to_string(),
            network: record.map(StoredNetwork::from),
        }
    }
}

impl From<&StoredCredentialRecord> for StoredNetwork {
    fn from(record: &StoredCredentialRecord) -> Self {
        Self {
            network_name: record.network_name.clone(),
            open: record.secret.is_empty(),
            captured_from: record.captured_from.clone(),
            accepted_at: record.accepted_at,
            verified: record.verified,
        }
    }
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
