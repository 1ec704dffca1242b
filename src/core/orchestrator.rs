//! Serialized application and verification of received credentials

use serde::Serialize;
use std::{collections::VecDeque, sync::Arc, time::SystemTime};
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::backend::NetworkStack;
use crate::config::settings::VerifyPolicy;
use crate::core::{
    error::{NetworkError, ProvisioningError, StoreResult},
    store::CredentialStore,
    types::{AttemptStatus, Credentials, PeerId, StoredCredentialRecord},
};

/// Final result of one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub peer_id: PeerId,
    pub network_name: String,
    pub result: Result<(), ProvisioningError>,
    /// Connectivity checks performed
    pub polls: u32,
    /// The previous network was re-activated after a failed verification
    pub rolled_back: bool,
    /// The stored record now holds these credentials
    pub persisted: bool,
}

impl ProvisioningReport {
    pub fn status(&self) -> AttemptStatus {
        match self.result {
            Ok(()) => AttemptStatus::Succeeded,
            Err(_) => AttemptStatus::Failed,
        }
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.result.as_ref().err().map(ProvisioningError::kind)
    }
}

/// An attempt that is being worked on
#[derive(Debug, Clone)]
struct ProvisioningAttempt {
    credentials: Credentials,
    retry_count: u32,
    status: AttemptStatus,
}

/// Status view of an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSnapshot {
    pub peer_id: PeerId,
    pub network_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    pub retry_count: u32,
}

impl AttemptSnapshot {
    fn queued(credentials: &Credentials) -> Self {
        Self {
            peer_id: credentials.captured_from().clone(),
            network_name: credentials.network_name().to_string(),
            status: None,
            retry_count: 0,
        }
    }
}

/// Status view of the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<AttemptSnapshot>,
    pub queued: Vec<AttemptSnapshot>,
}

struct Inner<N: NetworkStack> {
    network: N,
    store: CredentialStore,
    policy: VerifyPolicy,
    queue: Mutex<VecDeque<Credentials>>,
    current: Mutex<Option<ProvisioningAttempt>>,
    wake: Notify,
    reports: mpsc::UnboundedSender<ProvisioningReport>,
}

/// Applies credentials one attempt at a time
///
/// Submissions land in a FIFO queue drained by a single worker task, so at
/// most one activation or verification is ever in progress. A submission
/// replaces a queued, not yet started one from the same peer. Each finished
/// attempt produces a [`ProvisioningReport`] on the channel returned by
/// [`ProvisioningOrchestrator::new`].
pub struct ProvisioningOrchestrator<N: NetworkStack> {
    inner: Arc<Inner<N>>,
}

impl<N: NetworkStack> Clone for ProvisioningOrchestrator<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: NetworkStack> ProvisioningOrchestrator<N> {
    pub fn new(
        network: N,
        store: CredentialStore,
        policy: VerifyPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ProvisioningReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            inner: Arc::new(Inner {
                network,
                store,
                policy,
                queue: Mutex::new(VecDeque::new()),
                current: Mutex::new(None),
                wake: Notify::new(),
                reports,
            }),
        };
        (orchestrator, rx)
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Queue credentials for application
    ///
    /// Returns true if a queued attempt from the same peer was superseded.
    pub async fn submit(&self, credentials: Credentials) -> bool {
        let superseded = {
            let mut queue = self.inner.queue.lock().await;
            let before = queue.len();
            queue.retain(|queued| queued.captured_from() != credentials.captured_from());
            let superseded = queue.len() != before;

            info!(
                peer = %credentials.captured_from(),
                network = credentials.network_name(),
                position = queue.len(),
                superseded,
                "Provisioning attempt queued"
            );
            queue.push_back(credentials);
            superseded
        };

        self.inner.wake.notify_one();
        superseded
    }

    /// Queue the stored record, if any, for re-application
    pub async fn restore_from_store(&self) -> StoreResult<bool> {
        let Some(record) = self.inner.store.load().await? else {
            debug!("Nothing to restore");
            return Ok(false);
        };

        info!(network = %record.network_name, "Restoring stored credentials");
        self.submit(record.credentials()?).await;
        Ok(true)
    }

    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        let current = self
            .inner
            .current
            .lock()
            .await
            .as_ref()
            .map(|attempt| AttemptSnapshot {
                status: Some(attempt.status),
                retry_count: attempt.retry_count,
                ..AttemptSnapshot::queued(&attempt.credentials)
            });
        let queued = self
            .inner
            .queue
            .lock()
            .await
            .iter()
            .map(AttemptSnapshot::queued)
            .collect();

        OrchestratorSnapshot { current, queued }
    }

    /// Start the worker that drains the queue
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run().await })
    }

    async fn run(self) {
        debug!("Provisioning worker started");
        loop {
            let next = self.inner.queue.lock().await.pop_front();
            match next {
                Some(credentials) => {
                    let report = self.process(credentials).await;
                    if self.inner.reports.send(report).is_err() {
                        debug!("Report receiver dropped, stopping provisioning worker");
                        return;
                    }
                }
                None => self.inner.wake.notified().await,
            }
        }
    }

    async fn set_status(&self, status: AttemptStatus, retry_count: u32) {
        if let Some(attempt) = self.inner.current.lock().await.as_mut() {
            attempt.status = status;
            attempt.retry_count = retry_count;
        }
    }

    async fn process(&self, credentials: Credentials) -> ProvisioningReport {
        let peer_id = credentials.captured_from().clone();
        let network_name = credentials.network_name().to_string();
        *self.inner.current.lock().await = Some(ProvisioningAttempt {
            credentials: credentials.clone(),
            retry_count: 0,
            status: AttemptStatus::Applying,
        });

        let mut report = ProvisioningReport {
            peer_id,
            network_name,
            result: Ok(()),
            polls: 0,
            rolled_back: false,
            persisted: false,
        };

        info!(
            peer = %report.peer_id,
            network = %report.network_name,
            secret = %credentials.secret().fingerprint(),
            "Applying credentials"
        );

        // Applying changes the active network; never retried
        if let Err(e) = self.inner.network.activate(&credentials).await {
            error!(peer = %report.peer_id, network = %report.network_name, "Apply failed: {}", e);
            report.result = Err(e.into());
            return self.finish(report).await;
        }

        self.set_status(AttemptStatus::Verifying, 0).await;
        let (verified, polls) = self.verify(&credentials).await;
        report.polls = polls;

        if !verified {
            report.result = Err(ProvisioningError::VerifyTimeout { attempts: polls });
            error!(
                peer = %report.peer_id,
                network = %report.network_name,
                polls,
                "Network did not come up"
            );
            report.rolled_back = self.roll_back(&credentials).await;
            return self.finish(report).await;
        }

        let record = StoredCredentialRecord::new(&credentials, SystemTime::now(), true);
        match self.inner.store.replace(&record).await {
            Ok(()) => report.persisted = true,
            // Provisioning itself worked; only the durable copy is missing
            Err(e) => error!(network = %report.network_name, "Failed to store credentials: {}", e),
        }

        info!(peer = %report.peer_id, network = %report.network_name, polls, "Network provisioned");
        self.finish(report).await
    }

    async fn finish(&self, report: ProvisioningReport) -> ProvisioningReport {
        *self.inner.current.lock().await = None;
        report
    }

    /// Poll connectivity with bounded backoff; returns (associated, polls)
    async fn verify(&self, credentials: &Credentials) -> (bool, u32) {
        let name = credentials.network_name();
        let policy = self.inner.policy;

        for poll in 0..policy.max_polls {
            tokio::time::sleep(policy.backoff.delay(poll)).await;
            self.set_status(AttemptStatus::Verifying, poll).await;

            match self.inner.network.query_connectivity(name).await {
                Ok(status) if status.is_associated_with(name) => {
                    debug!(network = name, poll = poll + 1, ?status, "Association confirmed");
                    return (true, poll + 1);
                }
                Ok(status) => debug!(network = name, poll = poll + 1, ?status, "Not associated yet"),
                Err(e) => warn!(network = name, poll = poll + 1, "Connectivity query failed: {}", e),
            }
        }

        (false, policy.max_polls)
    }

    /// Re-activate the last known-good network after a failed verification
    async fn roll_back(&self, failed: &Credentials) -> bool {
        let previous = match self.inner.store.load().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No previous network to roll back to");
                return false;
            }
            Err(e) => {
                warn!("Cannot read previous network for rollback: {}", e);
                return false;
            }
        };

        let previous = match previous.credentials() {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Stored network unusable for rollback: {}", e);
                return false;
            }
        };

        info!(
            from = failed.network_name(),
            to = previous.network_name(),
            "Rolling back to previous network"
        );
        match self.inner.network.rollback(&previous).await {
            Ok(()) => true,
            Err(NetworkError::RollbackUnsupported) => {
                info!("Network stack does not support rollback, leaving configuration as is");
                false
            }
            Err(e) => {
                error!("Rollback failed: {}", e);
                false
            }
        }
    }
}
