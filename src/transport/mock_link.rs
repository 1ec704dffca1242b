//! Mock link stack for testing

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, mpsc};

use crate::core::error::{LinkError, LinkResult};
use crate::core::types::{PeerId, PeerMetadata};
use crate::transport::link_stack::{LinkEvent, LinkStack};

type Inbox = Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

#[derive(Debug, Default)]
struct MockLinkState {
    discovery_enabled: bool,
    should_fail_discovery: bool,
    should_fail_send: bool,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
    names: HashMap<PeerId, String>,
    sent: HashMap<PeerId, Vec<Vec<u8>>>,
    inbox_tx: HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>,
    inbox_rx: HashMap<PeerId, Inbox>,
}

impl MockLinkState {
    fn inbox(&mut self, peer_id: &PeerId) -> (mpsc::UnboundedSender<Vec<u8>>, Inbox) {
        if !self.inbox_tx.contains_key(peer_id) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inbox_tx.insert(peer_id.clone(), tx);
            self.inbox_rx
                .insert(peer_id.clone(), Arc::new(Mutex::new(rx)));
        }
        (
            self.inbox_tx[peer_id].clone(),
            self.inbox_rx[peer_id].clone(),
        )
    }
}

/// Mock link stack for testing
///
/// Tests drive peers with [`connect`](Self::connect),
/// [`disconnect`](Self::disconnect) and [`respond`](Self::respond), and
/// inspect the frames the device sent.
#[derive(Debug, Clone, Default)]
pub struct MockLinkStack {
    inner: Arc<Mutex<MockLinkState>>,
}

impl MockLinkStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_discovery_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_discovery = should_fail;
    }

    pub async fn set_send_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_send = should_fail;
    }

    pub async fn is_discovery_enabled(&self) -> bool {
        self.inner.lock().await.discovery_enabled
    }

    /// Register a name returned by `peer_metadata`
    pub async fn set_peer_name(&self, peer_id: &PeerId, name: &str) {
        self.inner
            .lock()
            .await
            .names
            .insert(peer_id.clone(), name.to_string());
    }

    /// Simulate a peer connecting
    pub async fn connect(&self, peer_id: &PeerId, display_name: Option<&str>) {
        self.emit(LinkEvent::Connected {
            peer_id: peer_id.clone(),
            display_name: display_name.map(str::to_string),
        })
        .await;
    }

    /// Simulate a peer disconnecting
    pub async fn disconnect(&self, peer_id: &PeerId) {
        self.emit(LinkEvent::Disconnected {
            peer_id: peer_id.clone(),
        })
        .await;
    }

    async fn emit(&self, event: LinkEvent) {
        if let Some(tx) = &self.inner.lock().await.events {
            let _ = tx.send(event);
        }
    }

    /// Queue a frame as if the peer had written it
    pub async fn respond(&self, peer_id: &PeerId, frame: Vec<u8>) {
        let (tx, _) = self.inner.lock().await.inbox(peer_id);
        let _ = tx.send(frame);
    }

    /// Frames sent to a peer so far
    pub async fn sent(&self, peer_id: &PeerId) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .await
            .sent
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until at least `count` frames were sent to a peer
    pub async fn wait_for_sent(&self, peer_id: &PeerId, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sent(peer_id).await.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

impl LinkStack for MockLinkStack {
    async fn enable_discovery(&self) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        if state.should_fail_discovery {
            return Err(LinkError::AdapterMissing);
        }
        state.discovery_enabled = true;
        Ok(())
    }

    async fn subscribe(&self) -> LinkResult<mpsc::UnboundedReceiver<LinkEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.events = Some(tx);
        Ok(rx)
    }

    async fn peer_metadata(&self, peer_id: &PeerId) -> LinkResult<PeerMetadata> {
        self.inner
            .lock()
            .await
            .names
            .get(peer_id)
            .map(|name| PeerMetadata {
                display_name: name.clone(),
            })
            .ok_or_else(|| LinkError::UnknownPeer(peer_id.clone()))
    }

    async fn send(&self, peer_id: &PeerId, frame: Vec<u8>) -> LinkResult<()> {
        let mut state = self.inner.lock().await;
        if state.should_fail_send {
            return Err(LinkError::SendFailed("Mock send failure".into()));
        }
        // a new request makes earlier responses stale
        state.inbox_tx.remove(peer_id);
        state.inbox_rx.remove(peer_id);
        state.sent.entry(peer_id.clone()).or_default().push(frame);
        Ok(())
    }

    async fn receive(&self, peer_id: &PeerId) -> LinkResult<Vec<u8>> {
        let (_, inbox) = self.inner.lock().await.inbox(peer_id);
        let mut rx = inbox.lock().await;
        rx.recv().await.ok_or(LinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_events_flow_to_subscriber() {
        let link = MockLinkStack::new();
        let mut events = link.subscribe().await.unwrap();
        let peer = PeerId::from("peer-1");

        link.connect(&peer, Some("Phone")).await;
        link.disconnect(&peer).await;

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Connected {
                peer_id: peer.clone(),
                display_name: Some("Phone".into())
            })
        );
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Disconnected { peer_id: peer })
        );
    }

    #[tokio::test]
    async fn test_response_queued_before_receive() {
        let link = MockLinkStack::new();
        let peer = PeerId::from("peer-1");

        link.respond(&peer, vec![1, 2, 3]).await;
        assert_eq!(link.receive(&peer).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_discards_earlier_responses() {
        let link = MockLinkStack::new();
        let peer = PeerId::from("peer-1");

        link.respond(&peer, vec![1]).await;
        link.send(&peer, vec![9]).await.unwrap();
        link.respond(&peer, vec![2]).await;

        assert_eq!(link.receive(&peer).await.unwrap(), vec![2]);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), link.receive(&peer))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_send_records_frames() {
        let link = MockLinkStack::new();
        let peer = PeerId::from("peer-1");

        link.send(&peer, vec![9]).await.unwrap();
        assert!(link.wait_for_sent(&peer, 1, Duration::from_millis(50)).await);
        assert_eq!(link.sent(&peer).await, vec![vec![9]]);

        link.set_send_failure(true).await;
        assert!(link.send(&peer, vec![9]).await.is_err());
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let link = MockLinkStack::new();
        link.set_discovery_failure(true).await;

        assert_eq!(link.enable_discovery().await, Err(LinkError::AdapterMissing));
        assert!(!link.is_discovery_enabled().await);
    }
}
