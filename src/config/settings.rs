//! Runtime settings

use std::{path::PathBuf, time::Duration};

use crate::config::CliArgs;
use crate::core::{error::SetupError, types::Backoff};

/// Longest name BlueZ accepts as an adapter alias
const MAX_DEVICE_NAME_LEN: usize = 248;

/// Timing of a credential exchange with one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTiming {
    /// Deadline for the peer's response once the request was picked up
    pub response_timeout: Duration,
    /// Deadline for the peer to pick up a request
    pub send_timeout: Duration,
    /// Requests per exchange, including the first
    pub max_attempts: u32,
    /// Delay between a failed request and the next one
    pub retry_backoff: Backoff,
    /// How long a finished or disconnected peer is kept around
    pub retirement_grace: Duration,
}

impl Default for ExchangeTiming {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(8)),
            retirement_grace: Duration::from_secs(5),
        }
    }
}

/// How connectivity is verified after applying credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub max_polls: u32,
    pub backoff: Backoff,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_polls: 5,
            backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(16)),
        }
    }
}

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub interface: String,
    pub device_name: String,
    pub store_path: PathBuf,
    pub restore_on_start: bool,
    pub exchange: ExchangeTiming,
    pub verify: VerifyPolicy,
    pub enable_unix_socket: bool,
    pub socket_path: String,
    pub socket_mode: u32,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        Settings {
            interface: args.interface,
            device_name: args.device_name,
            store_path: args.store_path,
            restore_on_start: args.restore_on_start,
            exchange: ExchangeTiming {
                response_timeout: Duration::from_secs(args.response_timeout),
                send_timeout: Duration::from_secs(args.send_timeout),
                max_attempts: args.max_attempts,
                retry_backoff: Backoff::new(
                    Duration::from_secs(args.retry_backoff),
                    Duration::from_secs(args.retry_backoff.saturating_mul(8)),
                ),
                retirement_grace: Duration::from_secs(args.retire_after),
            },
            verify: VerifyPolicy {
                max_polls: args.verify_polls,
                backoff: Backoff::new(
                    Duration::from_secs(args.verify_backoff),
                    Duration::from_secs(args.verify_backoff_cap),
                ),
            },
            enable_unix_socket: args.enable_unix_socket,
            socket_path: args.socket_path,
            socket_mode: args.socket_mode,
        }
    }
}

impl Settings {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.interface.is_empty() {
            return Err(SetupError::Config("interface must not be empty".into()));
        }
        if self.device_name.is_empty() || self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(SetupError::Config(format!(
                "device name must be 1-{} bytes",
                MAX_DEVICE_NAME_LEN
            )));
        }
        if self.store_path.file_name().is_none() {
            return Err(SetupError::Config(format!(
                "store path is not a file: {}",
                self.store_path.display()
            )));
        }
        if self.exchange.max_attempts == 0 {
            return Err(SetupError::Config("max attempts must be at least 1".into()));
        }
        if self.exchange.response_timeout.is_zero() || self.exchange.send_timeout.is_zero() {
            return Err(SetupError::Config("exchange timeouts must be positive".into()));
        }
        if self.verify.max_polls == 0 {
            return Err(SetupError::Config("verify polls must be at least 1".into()));
        }
        if self.verify.backoff.base > self.verify.backoff.cap {
            return Err(SetupError::Config(
                "verify backoff base exceeds its cap".into(),
            ));
        }
        if self.enable_unix_socket && self.socket_path.is_empty() {
            return Err(SetupError::Config("socket path must not be empty".into()));
        }
        Ok(())
    }
}
