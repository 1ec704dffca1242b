//! Peer and session bookkeeping owned by the dispatcher

use serde::Serialize;
use std::collections::HashMap;
use tokio::task::AbortHandle;

use crate::config::settings::ExchangeTiming;
use crate::core::{
    session::{CredentialExchangeSession, SessionSnapshot},
    types::{LinkState, Peer, PeerId},
};

/// Spawned link I/O and timers working for a peer
///
/// Everything still running is aborted when the set is dropped.
#[derive(Debug, Default)]
pub struct PeerTasks {
    receive: Option<AbortHandle>,
    other: Vec<AbortHandle>,
}

impl PeerTasks {
    pub fn track(&mut self, handle: AbortHandle) {
        self.other.retain(|h| !h.is_finished());
        self.other.push(handle);
    }

    /// Track the receive task; only one may listen to a peer at a time
    pub fn track_receive(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.receive.replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_receive(&mut self) {
        if let Some(handle) = self.receive.take() {
            handle.abort();
        }
    }

    pub fn abort_all(&mut self) {
        self.stop_receive();
        for handle in self.other.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PeerTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// A registered peer and its (at most one) session
#[derive(Debug)]
pub struct PeerEntry {
    pub peer: Peer,
    pub session: Option<CredentialExchangeSession>,
    pub tasks: PeerTasks,
    /// Bumped on every link change; pending retirements carry the value they saw
    generation: u64,
}

impl PeerEntry {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when a session exists that has not finished yet
    pub fn has_live_session(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_terminal())
    }
}

/// Status view of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    #[serde(flatten)]
    pub peer: Peer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

/// All peers the dispatcher currently knows about
///
/// Only the dispatch loop touches the registry, so it needs no locking.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerEntry>,
    next_serial: u64,
    next_generation: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(peer_id)
    }

    /// Session for `peer_id`, only if it is the one with `serial`
    pub fn session_mut(
        &mut self,
        peer_id: &PeerId,
        serial: u64,
    ) -> Option<&mut CredentialExchangeSession> {
        self.peers
            .get_mut(peer_id)?
            .session
            .as_mut()
            .filter(|s| s.serial() == serial)
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Create or refresh a peer as Connected
    pub fn upsert_connected(&mut self, peer_id: &PeerId, display_name: &str) -> &mut PeerEntry {
        let generation = self.bump_generation();
        let entry = self
            .peers
            .entry(peer_id.clone())
            .or_insert_with(|| PeerEntry {
                peer: Peer {
                    id: peer_id.clone(),
                    display_name: display_name.to_string(),
                    link_state: LinkState::Connected,
                },
                session: None,
                tasks: PeerTasks::default(),
                generation,
            });

        entry.peer.link_state = LinkState::Connected;
        entry.generation = generation;
        if !display_name.is_empty() {
            entry.peer.display_name = display_name.to_string();
        }
        entry
    }

    /// True when the peer is already Connected and still holds a session
    ///
    /// A repeated connect notification for such a peer must not start a new
    /// exchange, even when the held session has finished.
    pub fn holds_session(&self, peer_id: &PeerId) -> bool {
        self.peers.get(peer_id).is_some_and(|entry| {
            entry.peer.link_state == LinkState::Connected && entry.session.is_some()
        })
    }

    /// Install a fresh session unless a live one already exists
    ///
    /// A finished session is replaced. Returns the session to start, or
    /// `None` when the peer is unknown, not connected, or still exchanging.
    pub fn begin_session(
        &mut self,
        peer_id: &PeerId,
        timing: ExchangeTiming,
    ) -> Option<&mut CredentialExchangeSession> {
        let serial = self.next_serial + 1;
        let entry = self.peers.get_mut(peer_id)?;
        if entry.peer.link_state != LinkState::Connected || entry.has_live_session() {
            return None;
        }

        self.next_serial = serial;
        entry.session = Some(CredentialExchangeSession::new(
            serial,
            peer_id.clone(),
            timing,
        ));
        entry.session.as_mut()
    }

    /// Update the link state; returns the generation a retirement must match
    pub fn set_link_state(&mut self, peer_id: &PeerId, state: LinkState) -> Option<u64> {
        let generation = self.bump_generation();
        let entry = self.peers.get_mut(peer_id)?;
        entry.peer.link_state = state;
        entry.generation = generation;
        Some(generation)
    }

    /// Drop a Gone peer if nothing happened to it since `generation`
    pub fn retire_peer(&mut self, peer_id: &PeerId, generation: u64) -> Option<PeerEntry> {
        let entry = self.peers.get(peer_id)?;
        if entry.generation != generation || entry.peer.link_state != LinkState::Gone {
            return None;
        }
        self.peers.remove(peer_id)
    }

    /// Drop a finished session; the peer stays registered
    pub fn retire_session(&mut self, peer_id: &PeerId, serial: u64) -> bool {
        let Some(entry) = self.peers.get_mut(peer_id) else {
            return false;
        };
        match &entry.session {
            Some(s) if s.serial() == serial && s.is_terminal() => {
                entry.session = None;
                true
            }
            _ => false,
        }
    }

    /// Number of sessions that have not finished
    pub fn live_sessions(&self) -> usize {
        self.peers.values().filter(|e| e.has_live_session()).count()
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .map(|e| PeerSnapshot {
                peer: e.peer.clone(),
                session: e.session.as_ref().map(CredentialExchangeSession::snapshot),
            })
            .collect();
        peers.sort_by(|a, b| a.peer.id.cmp(&b.peer.id));
        peers
    }
}
