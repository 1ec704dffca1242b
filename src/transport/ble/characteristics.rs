//! BLE characteristic handlers

use bluer::{Address, gatt::local::ReqError};
use tracing::{debug, warn};

use crate::protocol::exchange::FrameError;

use super::session::BleSessions;

/// Characteristic handler for the provisioning service
///
/// Reads and writes are routed to the session of the requesting device.
pub struct CharacteristicHandler {
    sessions: BleSessions,
}

impl CharacteristicHandler {
    pub fn new(sessions: BleSessions) -> Self {
        Self { sessions }
    }

    /// Handle request characteristic read (long reads use `offset`)
    pub async fn handle_request_read(
        &self,
        address: Address,
        offset: u16,
    ) -> Result<Vec<u8>, ReqError> {
        match self.sessions.read_request(address, offset.into()).await {
            Some(chunk) => {
                debug!(
                    "Request read by {}: offset={}, chunk_size={}",
                    address,
                    offset,
                    chunk.len()
                );
                Ok(chunk)
            }
            None => {
                warn!("Request read from {} without a session", address);
                Err(ReqError::NotAuthorized)
            }
        }
    }

    /// Handle response characteristic write (prepared writes use `offset`)
    pub async fn handle_response_write(
        &self,
        address: Address,
        value: Vec<u8>,
        offset: u16,
    ) -> Result<(), ReqError> {
        debug!(
            "Response write from {}: offset={}, {} bytes",
            address,
            offset,
            value.len()
        );

        match self
            .sessions
            .write_response(address, offset.into(), &value)
            .await
        {
            Some(Ok(_)) => Ok(()),
            // the assembler only reports truncation when a write skips ahead
            Some(Err(FrameError::Truncated { .. })) => {
                warn!("Out of order response write from {}", address);
                Err(ReqError::InvalidOffset)
            }
            Some(Err(e)) => {
                warn!("Rejected response write from {}: {}", address, e);
                Err(ReqError::InvalidValueLength)
            }
            None => {
                warn!("Response write from {} without a session", address);
                Err(ReqError::NotAuthorized)
            }
        }
    }
}
