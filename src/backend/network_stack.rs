//! Network stack trait definition

use trait_variant::make;

use crate::core::error::{ApplyError, NetworkResult};
use crate::core::types::{ConnectivityStatus, Credentials};

/// Abstraction over the device's network configuration (typically wpa_supplicant)
///
/// The provisioning orchestrator is the only caller and serializes all
/// calls, so implementations never see two activations at once.
#[make(Send)]
pub trait NetworkStack: Send + Sync + 'static {
    /// Make `credentials` the device's active network
    ///
    /// Must be idempotent: activating the same credentials twice leaves the
    /// stack in the same target state. An error means the configuration
    /// itself was rejected.
    async fn activate(&self, credentials: &Credentials) -> Result<(), ApplyError>;

    /// Report the current association, used to verify an activation
    async fn query_connectivity(&self, network_name: &str) -> NetworkResult<ConnectivityStatus>;

    /// Restore a previously known-good configuration
    ///
    /// Stacks that cannot roll back answer `NetworkError::RollbackUnsupported`.
    async fn rollback(&self, previous: &Credentials) -> NetworkResult<()>;
}
