//! Domain types for WiFi provisioning

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::core::error::CredentialsError;

/// Maximum SSID length in bytes
pub const MAX_NETWORK_NAME_LEN: usize = 32;
const MIN_PASSPHRASE_LEN: usize = 8;
const MAX_PASSPHRASE_LEN: usize = 63;
const RAW_PSK_HEX_LEN: usize = 64;

/// Stable link-layer address of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Link state of a peer as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connected,
    Disconnecting,
    Gone,
}

/// A remote device linked over Bluetooth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub link_state: LinkState,
}

/// Metadata the link stack can report about a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMetadata {
    pub display_name: String,
}

/// Opaque network secret; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the secret is a 64 hex digit raw PSK rather than a passphrase
    pub fn is_raw_psk(&self) -> bool {
        self.0.len() == RAW_PSK_HEX_LEN && hex::decode(&self.0).is_ok()
    }

    /// Short SHA3-256 fingerprint, safe for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha3_256::digest(self.0.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{}>)", self.fingerprint())
    }
}

/// A validated credential set captured from a peer
///
/// Can only be built through [`Credentials::new`], so every value in the
/// system satisfies the network name and secret bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    network_name: String,
    secret: Secret,
    open: bool,
    captured_from: PeerId,
    captured_at: SystemTime,
}

impl Credentials {
    pub fn new(
        network_name: impl Into<String>,
        secret: Secret,
        open: bool,
        captured_from: PeerId,
        captured_at: SystemTime,
    ) -> Result<Self, CredentialsError> {
        let network_name = network_name.into();

        if network_name.is_empty() {
            return Err(CredentialsError::EmptyNetworkName);
        }
        if network_name.len() > MAX_NETWORK_NAME_LEN {
            return Err(CredentialsError::NetworkNameTooLong(network_name.len()));
        }

        if open {
            if !secret.is_empty() {
                return Err(CredentialsError::SecretOnOpenNetwork);
            }
        } else {
            validate_secret(&secret)?;
        }

        Ok(Self {
            network_name,
            secret,
            open,
            captured_from,
            captured_at,
        })
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn captured_from(&self) -> &PeerId {
        &self.captured_from
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}

fn validate_secret(secret: &Secret) -> Result<(), CredentialsError> {
    let raw = secret.expose();
    if raw.is_empty() {
        return Err(CredentialsError::MissingSecret);
    }
    if secret.is_raw_psk() {
        return Ok(());
    }

    let len = raw.chars().count();
    if !(MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&len) {
        return Err(CredentialsError::SecretLength(len));
    }
    if !raw.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(CredentialsError::SecretNotPrintable);
    }

    Ok(())
}

/// The durable record of the last accepted credential set
///
/// Serialized as `{networkName, secret, capturedFrom, acceptedAt, verified}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentialRecord {
    pub network_name: String,
    pub secret: String,
    pub captured_from: PeerId,
    /// Unix seconds
    pub accepted_at: u64,
    pub verified: bool,
}

impl StoredCredentialRecord {
    pub fn new(credentials: &Credentials, accepted_at: SystemTime, verified: bool) -> Self {
        Self {
            network_name: credentials.network_name().to_string(),
            secret: credentials.secret().expose().to_string(),
            captured_from: credentials.captured_from().clone(),
            accepted_at: unix_seconds(accepted_at),
            verified,
        }
    }

    /// Rebuild validated credentials from the record (an empty secret means open)
    pub fn credentials(&self) -> Result<Credentials, CredentialsError> {
        Credentials::new(
            self.network_name.clone(),
            Secret::new(self.secret.clone()),
            self.secret.is_empty(),
            self.captured_from.clone(),
            UNIX_EPOCH + Duration::from_secs(self.accepted_at),
        )
    }
}

pub fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Connectivity as reported by the network stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Disconnected,
    Associating { network_name: Option<String> },
    Associated {
        network_name: String,
        ip_address: Option<String>,
    },
}

impl ConnectivityStatus {
    /// True when associated with exactly the named network
    pub fn is_associated_with(&self, network_name: &str) -> bool {
        matches!(self, ConnectivityStatus::Associated { network_name: n, .. } if n == network_name)
    }
}

/// Credential exchange state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    AwaitingResponse,
    Validating,
    Succeeded,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed | SessionState::Aborted
        )
    }
}

/// Provisioning attempt states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Applying,
    Verifying,
    Succeeded,
    Failed,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Session identifier for status socket connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
