//! Link stack trait definition

use tokio::sync::mpsc;
use trait_variant::make;

use crate::core::error::LinkResult;
use crate::core::types::{PeerId, PeerMetadata};

/// Link-layer notification about a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Peer link established; the name is included when the stack knows it
    Connected {
        peer_id: PeerId,
        display_name: Option<String>,
    },
    /// Peer link lost
    Disconnected { peer_id: PeerId },
}

/// Abstraction over the short-range wireless link (typically BlueZ)
///
/// `send` and `receive` move whole exchange frames; the link stack handles
/// any fragmentation below that. Callers bound `receive` with their own
/// deadline.
#[make(Send)]
pub trait LinkStack: Send + Sync + 'static {
    /// Make the device discoverable and ready to accept peers
    async fn enable_discovery(&self) -> LinkResult<()>;

    /// Start delivering connect/disconnect notifications
    async fn subscribe(&self) -> LinkResult<mpsc::UnboundedReceiver<LinkEvent>>;

    /// Look up what the link layer knows about a peer
    async fn peer_metadata(&self, peer_id: &PeerId) -> LinkResult<PeerMetadata>;

    /// Deliver a frame to a peer; resolves once the peer has taken it
    async fn send(&self, peer_id: &PeerId, frame: Vec<u8>) -> LinkResult<()>;

    /// Wait for the next frame from a peer
    ///
    /// Only frames that arrive after the latest `send` to the peer are
    /// delivered; anything received earlier belongs to a previous request
    /// and is dropped.
    async fn receive(&self, peer_id: &PeerId) -> LinkResult<Vec<u8>>;
}
