//! Notification message types (server-to-client events)

use serde::{Deserialize, Serialize};

use crate::core::{
    dispatcher::DispatcherNotice,
    orchestrator::ProvisioningReport,
    session::SessionOutcome,
    types::{AttemptStatus, PeerId, SessionState},
};

/// Server-to-client notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// A credential exchange ended
    SessionFinished(SessionFinishedParams),

    /// A provisioning attempt ended
    ProvisioningFinished(ProvisioningFinishedParams),
}

/// Session finished notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionFinishedParams {
    pub peer_id: PeerId,
    pub state: SessionState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provisioning finished notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisioningFinishedParams {
    pub peer_id: PeerId,
    pub network_name: String,
    pub status: AttemptStatus,
    pub polls: u32,
    pub rolled_back: bool,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&SessionOutcome> for SessionFinishedParams {
    fn from(outcome: &SessionOutcome) -> Self {
        Self {
            peer_id: outcome.peer_id.clone(),
            state: outcome.state,
            attempts: outcome.attempts,
            error_kind: outcome.error_kind().map(str::to_string),
            error: outcome.last_error.as_ref().map(ToString::to_string),
        }
    }
}

impl From<&ProvisioningReport> for ProvisioningFinishedParams {
    fn from(report: &ProvisioningReport) -> Self {
        Self {
            peer_id: report.peer_id.clone(),
            network_name: report.network_name.clone(),
            status: report.status(),
            polls: report.polls,
            rolled_back: report.rolled_back,
            persisted: report.persisted,
            error_kind: report.error_kind().map(str::to_string),
            error: report.result.as_ref().err().map(ToString::to_string),
        }
    }
}

impl From<&DispatcherNotice> for Notification {
    fn from(notice: &DispatcherNotice) -> Self {
        match notice {
            DispatcherNotice::SessionFinished(outcome) => {
                Notification::SessionFinished(outcome.into())
            }
            DispatcherNotice::ProvisioningFinished(report) => {
                Notification::ProvisioningFinished(report.into())
            }
        }
    }
}
