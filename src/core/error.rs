//! Error types for the WiFi provisioning service

use thiserror::Error;

use super::types::PeerId;

/// Result type for link stack operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Result type for network stack queries
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Result type for credential store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by the link-layer collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Link stack unavailable: {0}")]
    Unavailable(String),

    #[error("No Bluetooth adapter available")]
    AdapterMissing,

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Send to peer failed: {0}")]
    SendFailed(String),

    #[error("Receive from peer failed: {0}")]
    ReceiveFailed(String),

    #[error("Link event channel closed")]
    Closed,
}

/// Reasons a single credential exchange attempt did not produce credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("No response before deadline")]
    Timeout,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid credentials: {0}")]
    Invalid(#[from] CredentialsError),

    #[error("Peer refused the exchange{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Refused(Option<String>),

    #[error("Request could not be sent: {0}")]
    Send(String),
}

impl ExchangeError {
    /// Short, stable name of the error kind for reports
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Timeout => "exchange_timeout",
            ExchangeError::Malformed(_) => "exchange_malformed",
            ExchangeError::Invalid(_) => "exchange_invalid",
            ExchangeError::Refused(_) => "exchange_refused",
            ExchangeError::Send(_) => "exchange_send",
        }
    }

    /// A refusal is final; everything else may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExchangeError::Refused(_))
    }
}

/// Credential validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("Network name is empty")]
    EmptyNetworkName,

    #[error("Network name too long: {0} bytes (max 32)")]
    NetworkNameTooLong(usize),

    #[error("Secret required for a protected network")]
    MissingSecret,

    #[error("Open network must not carry a secret")]
    SecretOnOpenNetwork,

    #[error("Invalid passphrase length: {0} (expected 8-63 characters or 64 hex digits)")]
    SecretLength(usize),

    #[error("Passphrase contains non-printable or non-ASCII characters")]
    SecretNotPrintable,
}

/// Network stack rejected the requested configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Configuration rejected: {0}")]
    Rejected(String),

    #[error("Network stack unavailable: {0}")]
    Unavailable(String),
}

/// Errors from network stack queries and rollback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connectivity query failed: {0}")]
    QueryFailed(String),

    #[error("Rollback not supported by this network stack")]
    RollbackUnsupported,

    #[error("Rollback failed: {0}")]
    RollbackFailed(#[from] ApplyError),

    #[error("wpa_supplicant error: {0}")]
    WpaSupplicant(String),
}

/// Terminal failure of a provisioning attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Apply failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("Network not associated after {attempts} verification attempts")]
    VerifyTimeout { attempts: u32 },
}

impl ProvisioningError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisioningError::Apply(_) => "apply_error",
            ProvisioningError::VerifyTimeout { .. } => "verify_timeout",
        }
    }
}

/// Errors related to the durable credential record
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Stored record is invalid: {0}")]
    InvalidRecord(#[from] CredentialsError),
}

/// Operator commands the dispatcher refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer is not connected: {0}")]
    NotConnected(PeerId),

    #[error("Exchange already in progress with {0}")]
    ExchangeInProgress(PeerId),

    #[error("Dispatcher stopped")]
    DispatcherStopped,
}

/// Errors related to the status socket transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Socket activation failed: {0}")]
    Activation(String),
}

/// Fatal setup failures; each maps to a distinct process exit code
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Link stack setup failed: {0}")]
    Link(#[from] LinkError),

    #[error("Network stack setup failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Credential store unusable: {0}")]
    Store(#[from] StoreError),

    #[error("Status socket setup failed: {0}")]
    Transport(#[from] TransportError),
}

impl SetupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            SetupError::Config(_) => 2,
            SetupError::Link(_) => 3,
            SetupError::Network(_) => 4,
            SetupError::Store(_) => 5,
            SetupError::Transport(_) => 6,
        }
    }
}
