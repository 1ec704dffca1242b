//! Per-peer credential exchange state machine
//!
//! The session owns no I/O. Every transition returns the [`SessionAction`]s
//! the dispatcher has to carry out (send a frame, listen for a response, arm
//! a timer, deliver credentials). Work started for a transition is tagged with
//! the session epoch at that moment; completions arriving with an older epoch
//! are ignored.

use serde::Serialize;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::settings::ExchangeTiming;
use crate::core::{
    error::{ExchangeError, LinkError},
    types::{Credentials, PeerId, Secret, SessionState},
};
use crate::protocol::exchange::{self, PeerMessage};

/// Work requested by a session transition
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send `frame` to the peer and report back through `on_send_result`
    Send { epoch: u64, frame: Vec<u8> },
    /// Wait for one frame from the peer and report it through `on_response`
    Receive { epoch: u64 },
    /// Call `on_timer` once `deadline` has passed
    ArmTimer { epoch: u64, deadline: Instant },
    /// Validated credentials; emitted at most once per session
    Deliver(Credentials),
    /// The session reached a terminal state
    Finished(SessionOutcome),
}

/// Terminal summary of an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub peer_id: PeerId,
    pub state: SessionState,
    pub attempts: u32,
    pub last_error: Option<ExchangeError>,
}

impl SessionOutcome {
    pub fn error_kind(&self) -> Option<&'static str> {
        self.last_error.as_ref().map(ExchangeError::kind)
    }
}

/// Where a Requesting session is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    /// Waiting out the retry backoff
    Backoff,
    /// Request handed to the link, waiting for pickup
    InFlight,
}

/// Status view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub peer_id: PeerId,
    pub state: SessionState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Credential exchange with one peer
#[derive(Debug)]
pub struct CredentialExchangeSession {
    serial: u64,
    peer_id: PeerId,
    timing: ExchangeTiming,
    state: SessionState,
    phase: Option<RequestPhase>,
    /// Failed requests so far
    attempts: u32,
    epoch: u64,
    exchange_id: Uuid,
    deadline: Option<Instant>,
    last_error: Option<ExchangeError>,
    delivered: bool,
}

impl CredentialExchangeSession {
    pub fn new(serial: u64, peer_id: PeerId, timing: ExchangeTiming) -> Self {
        Self {
            serial,
            peer_id,
            timing,
            state: SessionState::Idle,
            phase: None,
            attempts: 0,
            epoch: 0,
            exchange_id: Uuid::new_v4(),
            deadline: None,
            last_error: None,
            delivered: false,
        }
    }

    /// Registry-wide identity of this session, distinct across reconnects
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn last_error(&self) -> Option<&ExchangeError> {
        self.last_error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            peer_id: self.peer_id.clone(),
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Idle → Requesting: issue the first request
    pub fn start(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        debug!(peer = %self.peer_id, "Exchange started");
        self.send_request(now)
    }

    /// Outcome of a `Send` action
    pub fn on_send_result(
        &mut self,
        epoch: u64,
        result: Result<(), LinkError>,
        now: Instant,
    ) -> Vec<SessionAction> {
        if !self.is_current(epoch) || self.phase != Some(RequestPhase::InFlight) {
            return Vec::new();
        }

        match result {
            Ok(()) => {
                self.state = SessionState::AwaitingResponse;
                self.phase = None;
                let epoch = self.advance_epoch();
                let deadline = now + self.timing.response_timeout;
                self.deadline = Some(deadline);
                debug!(peer = %self.peer_id, attempt = self.attempts + 1, "Request picked up");
                vec![
                    SessionAction::Receive { epoch },
                    SessionAction::ArmTimer { epoch, deadline },
                ]
            }
            Err(e) => self.fail_attempt(ExchangeError::Send(e.to_string()), now),
        }
    }

    /// A frame arrived in answer to a `Receive` action
    pub fn on_response(&mut self, epoch: u64, frame: &[u8], now: Instant) -> Vec<SessionAction> {
        if !self.is_current(epoch) || self.state != SessionState::AwaitingResponse {
            return Vec::new();
        }

        self.state = SessionState::Validating;
        match exchange::decode_response(frame) {
            Ok(message) => match message.exchange_id() {
                Some(id) if id != self.exchange_id => {
                    debug!(peer = %self.peer_id, %id, "Ignoring response to an earlier request");
                    self.state = SessionState::AwaitingResponse;
                    vec![SessionAction::Receive { epoch }]
                }
                _ => self.validate(message, now),
            },
            Err(e) => self.fail_attempt(e, now),
        }
    }

    /// The link could not deliver a frame for a `Receive` action
    ///
    /// The response deadline stays armed, so a dead link ends up as a timeout.
    pub fn on_receive_error(&mut self, epoch: u64, error: &LinkError) -> Vec<SessionAction> {
        if self.is_current(epoch) && self.state == SessionState::AwaitingResponse {
            warn!(peer = %self.peer_id, "Receive failed: {}", error);
        }
        Vec::new()
    }

    /// A timer armed by `ArmTimer` expired
    pub fn on_timer(&mut self, epoch: u64, now: Instant) -> Vec<SessionAction> {
        if !self.is_current(epoch) {
            return Vec::new();
        }

        match (self.state, self.phase) {
            (SessionState::Requesting, Some(RequestPhase::Backoff)) => self.send_request(now),
            (SessionState::Requesting, Some(RequestPhase::InFlight)) => self.fail_attempt(
                ExchangeError::Send("request not picked up before deadline".into()),
                now,
            ),
            (SessionState::AwaitingResponse, _) => self.fail_attempt(ExchangeError::Timeout, now),
            _ => Vec::new(),
        }
    }

    /// Any non-terminal state → Aborted; no-op once terminal
    pub fn abort(&mut self) -> Vec<SessionAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        self.state = SessionState::Aborted;
        self.phase = None;
        self.deadline = None;
        self.advance_epoch();
        info!(peer = %self.peer_id, attempts = self.attempts, "Exchange aborted");
        vec![SessionAction::Finished(self.outcome())]
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.is_terminal() && epoch == self.epoch
    }

    fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn send_request(&mut self, now: Instant) -> Vec<SessionAction> {
        self.state = SessionState::Requesting;
        self.exchange_id = Uuid::new_v4();
        let attempt = self.attempts + 1;

        let frame = match exchange::encode_request(self.exchange_id, attempt) {
            Ok(frame) => frame,
            Err(e) => return self.finish_failed(e),
        };

        self.phase = Some(RequestPhase::InFlight);
        let epoch = self.advance_epoch();
        let deadline = now + self.timing.send_timeout;
        self.deadline = Some(deadline);
        debug!(peer = %self.peer_id, attempt, exchange_id = %self.exchange_id, "Sending credential request");

        vec![
            SessionAction::Send { epoch, frame },
            SessionAction::ArmTimer { epoch, deadline },
        ]
    }

    fn validate(&mut self, message: PeerMessage, now: Instant) -> Vec<SessionAction> {
        let offer = match message {
            PeerMessage::Refusal(refusal) if refusal.refused => {
                return self.finish_failed(ExchangeError::Refused(refusal.reason));
            }
            PeerMessage::Refusal(_) => {
                return self.fail_attempt(
                    ExchangeError::Malformed("refusal without refused flag".into()),
                    now,
                );
            }
            PeerMessage::Offer(offer) => offer,
        };

        let credentials = match Credentials::new(
            offer.network_name,
            Secret::new(offer.secret),
            offer.open,
            self.peer_id.clone(),
            SystemTime::now(),
        ) {
            Ok(credentials) => credentials,
            Err(e) => return self.fail_attempt(e.into(), now),
        };

        self.state = SessionState::Succeeded;
        self.phase = None;
        self.deadline = None;
        self.advance_epoch();

        info!(
            peer = %self.peer_id,
            network = credentials.network_name(),
            secret = %credentials.secret().fingerprint(),
            attempts = self.attempts + 1,
            "Credentials received"
        );

        let mut actions = Vec::with_capacity(2);
        if !self.delivered {
            self.delivered = true;
            actions.push(SessionAction::Deliver(credentials));
        }
        actions.push(SessionAction::Finished(self.outcome()));
        actions
    }

    fn fail_attempt(&mut self, error: ExchangeError, now: Instant) -> Vec<SessionAction> {
        if !error.is_retryable() {
            return self.finish_failed(error);
        }

        self.attempts += 1;
        warn!(
            peer = %self.peer_id,
            attempt = self.attempts,
            max_attempts = self.timing.max_attempts,
            kind = error.kind(),
            "Exchange attempt failed: {}",
            error
        );
        self.last_error = Some(error);

        if self.attempts >= self.timing.max_attempts {
            return self.finish(SessionState::Failed);
        }

        self.state = SessionState::Requesting;
        self.phase = Some(RequestPhase::Backoff);
        let epoch = self.advance_epoch();
        let deadline = now + self.timing.retry_backoff.delay(self.attempts - 1);
        self.deadline = Some(deadline);
        vec![SessionAction::ArmTimer { epoch, deadline }]
    }

    fn finish_failed(&mut self, error: ExchangeError) -> Vec<SessionAction> {
        self.attempts += 1;
        warn!(peer = %self.peer_id, kind = error.kind(), "Exchange failed: {}", error);
        self.last_error = Some(error);
        self.finish(SessionState::Failed)
    }

    fn finish(&mut self, state: SessionState) -> Vec<SessionAction> {
        self.state = state;
        self.phase = None;
        self.deadline = None;
        self.advance_epoch();
        info!(
            peer = %self.peer_id,
            ?state,
            attempts = self.attempts,
            kind = self.last_error.as_ref().map(ExchangeError::kind),
            "Exchange finished"
        );
        vec![SessionAction::Finished(self.outcome())]
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            peer_id: self.peer_id.clone(),
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}
