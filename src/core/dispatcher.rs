//! Event dispatcher: the single control loop over peers and sessions
//!
//! The dispatcher is the only consumer of link notifications and the only
//! owner of the [`PeerRegistry`]. It never awaits link or network I/O itself:
//! sends, receives, metadata lookups and timers run in spawned tasks that
//! report back through an internal channel, tagged with the session serial
//! and epoch that requested them.

use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::backend::NetworkStack;
use crate::config::settings::ExchangeTiming;
use crate::core::{
    error::{CommandError, LinkError, LinkResult},
    orchestrator::{OrchestratorSnapshot, ProvisioningOrchestrator, ProvisioningReport},
    registry::{PeerRegistry, PeerSnapshot},
    session::{SessionAction, SessionOutcome},
    types::{LinkState, PeerId, SessionState},
};
use crate::transport::link_stack::{LinkEvent, LinkStack};

const COMMAND_QUEUE_DEPTH: usize = 32;
const NOTICE_CAPACITY: usize = 64;

/// Something finished; pushed to status clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherNotice {
    SessionFinished(SessionOutcome),
    ProvisioningFinished(ProvisioningReport),
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub peers: Vec<PeerSnapshot>,
    pub live_sessions: usize,
    pub provisioning: OrchestratorSnapshot,
}

enum DispatcherCommand {
    Status(oneshot::Sender<StatusSnapshot>),
    Cancel {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Restart {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Shutdown,
}

/// Completions of work spawned on behalf of a session
#[derive(Debug)]
enum TaskEvent {
    SendDone {
        peer_id: PeerId,
        serial: u64,
        epoch: u64,
        result: LinkResult<()>,
    },
    Received {
        peer_id: PeerId,
        serial: u64,
        epoch: u64,
        result: LinkResult<Vec<u8>>,
    },
    Timer {
        peer_id: PeerId,
        serial: u64,
        epoch: u64,
    },
    Metadata {
        peer_id: PeerId,
        display_name: String,
    },
    RetirePeer {
        peer_id: PeerId,
        generation: u64,
    },
    RetireSession {
        peer_id: PeerId,
        serial: u64,
    },
}

/// Handle for operator commands and notice subscriptions
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<DispatcherCommand>,
    notices: broadcast::Sender<DispatcherNotice>,
}

impl std::fmt::Debug for DispatcherCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatcherCommand::Status(_) => f.write_str("Status"),
            DispatcherCommand::Cancel { peer_id, .. } => write!(f, "Cancel({})", peer_id),
            DispatcherCommand::Restart { peer_id, .. } => write!(f, "Restart({})", peer_id),
            DispatcherCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl DispatcherHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DispatcherCommand,
    ) -> Result<T, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| CommandError::DispatcherStopped)?;
        rx.await.map_err(|_| CommandError::DispatcherStopped)
    }

    pub async fn status(&self) -> Result<StatusSnapshot, CommandError> {
        self.request(DispatcherCommand::Status).await
    }

    /// Abort a peer's exchange and stop serving it until it reconnects
    pub async fn cancel_exchange(&self, peer_id: PeerId) -> Result<(), CommandError> {
        self.request(|reply| DispatcherCommand::Cancel { peer_id, reply })
            .await?
    }

    /// Start a fresh exchange with a connected peer
    pub async fn restart_exchange(&self, peer_id: PeerId) -> Result<(), CommandError> {
        self.request(|reply| DispatcherCommand::Restart { peer_id, reply })
            .await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherNotice> {
        self.notices.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(DispatcherCommand::Shutdown).await;
    }
}

/// The control loop
pub struct EventDispatcher<L: LinkStack, N: NetworkStack> {
    link: Arc<L>,
    orchestrator: ProvisioningOrchestrator<N>,
    reports: mpsc::UnboundedReceiver<ProvisioningReport>,
    registry: PeerRegistry,
    timing: ExchangeTiming,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    commands: mpsc::Receiver<DispatcherCommand>,
    notices: broadcast::Sender<DispatcherNotice>,
}

impl<L: LinkStack, N: NetworkStack> EventDispatcher<L, N> {
    /// Enable discovery, subscribe to link events and spawn the loop
    ///
    /// The provisioning worker is spawned alongside and stopped with the
    /// loop. The returned task ends with an error if the link event stream
    /// dies.
    pub async fn start(
        link: Arc<L>,
        orchestrator: ProvisioningOrchestrator<N>,
        reports: mpsc::UnboundedReceiver<ProvisioningReport>,
        timing: ExchangeTiming,
    ) -> LinkResult<(DispatcherHandle, JoinHandle<LinkResult<()>>)> {
        link.enable_discovery().await?;
        let link_events = link.subscribe().await?;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let handle = DispatcherHandle {
            commands: command_tx,
            notices: notices.clone(),
        };
        let dispatcher = Self {
            link,
            orchestrator,
            reports,
            registry: PeerRegistry::new(),
            timing,
            task_tx,
            task_rx,
            commands,
            notices,
        };

        let task = tokio::spawn(dispatcher.run(link_events));
        Ok((handle, task))
    }

    async fn run(mut self, mut link_events: mpsc::UnboundedReceiver<LinkEvent>) -> LinkResult<()> {
        let worker = self.orchestrator.spawn_worker();
        info!("Event dispatcher running");

        let result = loop {
            tokio::select! {
                event = link_events.recv() => match event {
                    Some(event) => self.on_link_event(event).await,
                    None => {
                        error!("Link event stream ended");
                        break Err(LinkError::Closed);
                    }
                },
                Some(event) = self.task_rx.recv() => self.on_task_event(event).await,
                Some(report) = self.reports.recv() => self.on_report(report),
                command = self.commands.recv() => match command {
                    Some(DispatcherCommand::Shutdown) | None => break Ok(()),
                    Some(command) => self.on_command(command).await,
                },
            }
        };

        worker.abort();
        info!(peers = self.registry.len(), "Event dispatcher stopped");
        result
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected {
                peer_id,
                display_name,
            } => self.on_peer_connected(peer_id, display_name).await,
            LinkEvent::Disconnected { peer_id } => self.on_peer_disconnected(peer_id).await,
        }
    }

    async fn on_peer_connected(&mut self, peer_id: PeerId, display_name: Option<String>) {
        let name = display_name.unwrap_or_default();
        info!(peer = %peer_id, name = %name, "Peer connected");

        let duplicate = self.registry.holds_session(&peer_id);
        let entry = self.registry.upsert_connected(&peer_id, &name);
        if name.is_empty() {
            let link = self.link.clone();
            let tx = self.task_tx.clone();
            let id = peer_id.clone();
            let task = tokio::spawn(async move {
                match link.peer_metadata(&id).await {
                    Ok(metadata) => {
                        let _ = tx.send(TaskEvent::Metadata {
                            peer_id: id,
                            display_name: metadata.display_name,
                        });
                    }
                    Err(e) => debug!(peer = %id, "No metadata: {}", e),
                }
            });
            entry.tasks.track(task.abort_handle());
        }

        if duplicate {
            debug!(peer = %peer_id, "Already connected, keeping its session");
        } else if !self.start_session(&peer_id).await {
            debug!(peer = %peer_id, "Exchange already running");
        }
    }

    async fn on_peer_disconnected(&mut self, peer_id: PeerId) {
        let Some(generation) = self.registry.set_link_state(&peer_id, LinkState::Gone) else {
            debug!(peer = %peer_id, "Disconnect from unknown peer");
            return;
        };
        info!(peer = %peer_id, "Peer disconnected");

        self.abort_session(&peer_id).await;
        self.schedule(
            &peer_id,
            self.timing.retirement_grace,
            TaskEvent::RetirePeer {
                peer_id: peer_id.clone(),
                generation,
            },
        );
    }

    /// Create and start a session; false if the peer cannot have one now
    async fn start_session(&mut self, peer_id: &PeerId) -> bool {
        let Some(session) = self.registry.begin_session(peer_id, self.timing) else {
            return false;
        };
        let serial = session.serial();
        let actions = session.start(Instant::now());
        self.execute(peer_id, serial, actions).await;
        true
    }

    async fn abort_session(&mut self, peer_id: &PeerId) {
        let Some((serial, actions)) = self
            .registry
            .get_mut(peer_id)
            .and_then(|entry| entry.session.as_mut())
            .map(|session| (session.serial(), session.abort()))
        else {
            return;
        };
        self.execute(peer_id, serial, actions).await;
    }

    async fn on_task_event(&mut self, event: TaskEvent) {
        let now = Instant::now();
        match event {
            TaskEvent::SendDone {
                peer_id,
                serial,
                epoch,
                result,
            } => {
                if let Some(session) = self.registry.session_mut(&peer_id, serial) {
                    let actions = session.on_send_result(epoch, result, now);
                    self.execute(&peer_id, serial, actions).await;
                }
            }
            TaskEvent::Received {
                peer_id,
                serial,
                epoch,
                result,
            } => {
                if let Some(session) = self.registry.session_mut(&peer_id, serial) {
                    let actions = match result {
                        Ok(frame) => session.on_response(epoch, &frame, now),
                        Err(e) => session.on_receive_error(epoch, &e),
                    };
                    self.execute(&peer_id, serial, actions).await;
                } else {
                    debug!(peer = %peer_id, "Discarding response for a retired session");
                }
            }
            TaskEvent::Timer {
                peer_id,
                serial,
                epoch,
            } => {
                if let Some(session) = self.registry.session_mut(&peer_id, serial) {
                    let actions = session.on_timer(epoch, now);
                    self.execute(&peer_id, serial, actions).await;
                }
            }
            TaskEvent::Metadata {
                peer_id,
                display_name,
            } => {
                if let Some(entry) = self.registry.get_mut(&peer_id) {
                    if entry.peer.display_name.is_empty() {
                        entry.peer.display_name = display_name;
                    }
                }
            }
            TaskEvent::RetirePeer {
                peer_id,
                generation,
            } => {
                if self.registry.retire_peer(&peer_id, generation).is_some() {
                    info!(peer = %peer_id, "Peer retired");
                }
            }
            TaskEvent::RetireSession { peer_id, serial } => {
                if self.registry.retire_session(&peer_id, serial) {
                    debug!(peer = %peer_id, "Finished session retired");
                }
            }
        }
    }

    /// Carry out what a session transition asked for
    async fn execute(&mut self, peer_id: &PeerId, serial: u64, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send { epoch, frame } => {
                    let link = self.link.clone();
                    let tx = self.task_tx.clone();
                    let id = peer_id.clone();
                    let task = tokio::spawn(async move {
                        let result = link.send(&id, frame).await;
                        let _ = tx.send(TaskEvent::SendDone {
                            peer_id: id,
                            serial,
                            epoch,
                            result,
                        });
                    });
                    self.track(peer_id, task.abort_handle(), false);
                }
                SessionAction::Receive { epoch } => {
                    let link = self.link.clone();
                    let tx = self.task_tx.clone();
                    let id = peer_id.clone();
                    let task = tokio::spawn(async move {
                        let result = link.receive(&id).await;
                        let _ = tx.send(TaskEvent::Received {
                            peer_id: id,
                            serial,
                            epoch,
                            result,
                        });
                    });
                    self.track(peer_id, task.abort_handle(), true);
                }
                SessionAction::ArmTimer { epoch, deadline } => {
                    let tx = self.task_tx.clone();
                    let id = peer_id.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        let _ = tx.send(TaskEvent::Timer {
                            peer_id: id,
                            serial,
                            epoch,
                        });
                    });
                    self.track(peer_id, task.abort_handle(), false);
                }
                SessionAction::Deliver(credentials) => {
                    self.orchestrator.submit(credentials).await;
                }
                SessionAction::Finished(outcome) => self.on_session_finished(serial, outcome),
            }
        }

        // Only a session waiting for a response may hold the peer's inbox
        if let Some(entry) = self.registry.get_mut(peer_id) {
            let awaiting = entry
                .session
                .as_ref()
                .is_some_and(|s| s.state() == SessionState::AwaitingResponse);
            if !awaiting {
                entry.tasks.stop_receive();
            }
        }
    }

    fn track(&mut self, peer_id: &PeerId, handle: tokio::task::AbortHandle, receive: bool) {
        match self.registry.get_mut(peer_id) {
            Some(entry) if receive => entry.tasks.track_receive(handle),
            Some(entry) => entry.tasks.track(handle),
            None => handle.abort(),
        }
    }

    fn on_session_finished(&mut self, serial: u64, outcome: SessionOutcome) {
        let peer_id = outcome.peer_id.clone();
        if let Some(entry) = self.registry.get_mut(&peer_id) {
            entry.tasks.abort_all();
        }

        match outcome.state {
            SessionState::Succeeded => info!(
                peer = %peer_id,
                attempts = outcome.attempts,
                "Exchange succeeded"
            ),
            state => warn!(
                peer = %peer_id,
                ?state,
                attempts = outcome.attempts,
                kind = outcome.error_kind(),
                "Exchange ended without credentials"
            ),
        }

        let _ = self
            .notices
            .send(DispatcherNotice::SessionFinished(outcome));

        self.schedule(
            &peer_id,
            self.timing.retirement_grace,
            TaskEvent::RetireSession {
                peer_id: peer_id.clone(),
                serial,
            },
        );
    }

    fn schedule(&mut self, peer_id: &PeerId, after: std::time::Duration, event: TaskEvent) {
        let tx = self.task_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        });
        self.track(peer_id, task.abort_handle(), false);
    }

    fn on_report(&mut self, report: ProvisioningReport) {
        match &report.result {
            Ok(()) => info!(
                peer = %report.peer_id,
                network = %report.network_name,
                persisted = report.persisted,
                "Provisioning succeeded"
            ),
            Err(e) => error!(
                peer = %report.peer_id,
                network = %report.network_name,
                kind = e.kind(),
                rolled_back = report.rolled_back,
                "Provisioning failed: {}",
                e
            ),
        }
        let _ = self
            .notices
            .send(DispatcherNotice::ProvisioningFinished(report));
    }

    async fn on_command(&mut self, command: DispatcherCommand) {
        match command {
            DispatcherCommand::Status(reply) => {
                let snapshot = StatusSnapshot {
                    peers: self.registry.snapshot(),
                    live_sessions: self.registry.live_sessions(),
                    provisioning: self.orchestrator.snapshot().await,
                };
                let _ = reply.send(snapshot);
            }
            DispatcherCommand::Cancel { peer_id, reply } => {
                let result = self.cancel(&peer_id).await;
                let _ = reply.send(result);
            }
            DispatcherCommand::Restart { peer_id, reply } => {
                let result = self.restart(&peer_id).await;
                let _ = reply.send(result);
            }
            DispatcherCommand::Shutdown => {}
        }
    }

    async fn cancel(&mut self, peer_id: &PeerId) -> Result<(), CommandError> {
        match self.registry.get(peer_id).map(|e| e.peer.link_state) {
            None => return Err(CommandError::UnknownPeer(peer_id.clone())),
            Some(LinkState::Gone) => return Err(CommandError::NotConnected(peer_id.clone())),
            Some(_) => {}
        }

        info!(peer = %peer_id, "Exchange cancelled by operator");
        self.registry
            .set_link_state(peer_id, LinkState::Disconnecting);
        self.abort_session(peer_id).await;
        Ok(())
    }

    async fn restart(&mut self, peer_id: &PeerId) -> Result<(), CommandError> {
        let Some(entry) = self.registry.get(peer_id) else {
            return Err(CommandError::UnknownPeer(peer_id.clone()));
        };
        if entry.peer.link_state == LinkState::Gone {
            return Err(CommandError::NotConnected(peer_id.clone()));
        }
        if entry.has_live_session() {
            return Err(CommandError::ExchangeInProgress(peer_id.clone()));
        }

        info!(peer = %peer_id, "Exchange restarted by operator");
        self.registry.set_link_state(peer_id, LinkState::Connected);
        self.start_session(peer_id).await;
        Ok(())
    }
}
