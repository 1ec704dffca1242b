//! WiFi Provisioning Service
//!
//! Receives WiFi credentials from a Bluetooth LE peer, applies them to the
//! local network stack, verifies connectivity and persists what worked:
//! - Bluetooth Low Energy (GATT) link to peers
//! - wpa_supplicant network stack
//! - Unix Domain Socket status interface (JSON-RPC 2.0)

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    dispatcher::{DispatcherHandle, DispatcherNotice, EventDispatcher, StatusSnapshot},
    error::{
        CommandError, ExchangeError, LinkError, NetworkError, ProvisioningError, SetupError,
        StoreError, TransportError,
    },
    orchestrator::{ProvisioningOrchestrator, ProvisioningReport},
    store::CredentialStore,
    types::{Credentials, PeerId, SessionState},
};
