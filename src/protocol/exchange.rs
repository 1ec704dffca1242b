//! Credential exchange wire format
//!
//! Every message travels in a frame:
//!
//! ```text
//! +---------+----------------+-------------------+
//! | version | length (u16 BE)| payload (JSON)    |
//! +---------+----------------+-------------------+
//! ```
//!
//! The payload is at most [`MAX_FRAME_PAYLOAD`] bytes so that a whole frame
//! fits into a single 512-byte GATT attribute value.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::ExchangeError;

pub const FRAME_VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 3;
pub const MAX_FRAME_PAYLOAD: usize = 512 - FRAME_HEADER_LEN;

/// Message sent from the device to the peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    #[serde(rename_all = "camelCase")]
    CredentialRequest { exchange_id: Uuid, attempt: u32 },
}

/// Message sent from the peer to the device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PeerMessage {
    Refusal(Refusal),
    Offer(CredentialOffer),
}

/// Peer declines to share credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Refusal {
    pub refused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<Uuid>,
}

/// Credentials offered by the peer (not yet validated)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOffer {
    pub network_name: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<Uuid>,
}

impl PeerMessage {
    /// Exchange id echoed by the peer, if any
    pub fn exchange_id(&self) -> Option<Uuid> {
        match self {
            PeerMessage::Refusal(r) => r.exchange_id,
            PeerMessage::Offer(o) => o.exchange_id,
        }
    }
}

/// Errors in the frame layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Unsupported frame version {0}")]
    Version(u8),

    #[error("Frame payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("Frame truncated: expected {expected} payload bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Trailing bytes after frame: {0}")]
    Trailing(usize),
}

impl From<FrameError> for ExchangeError {
    fn from(e: FrameError) -> Self {
        ExchangeError::Malformed(e.to_string())
    }
}

/// Wrap a payload into a frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Extract the payload of exactly one complete frame
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: FRAME_HEADER_LEN,
            actual: frame.len(),
        });
    }
    if frame[0] != FRAME_VERSION {
        return Err(FrameError::Version(frame[0]));
    }

    let expected = u16::from_be_bytes([frame[1], frame[2]]) as usize;
    if expected > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(expected));
    }

    let body = &frame[FRAME_HEADER_LEN..];
    match body.len() {
        n if n < expected => Err(FrameError::Truncated {
            expected,
            actual: n,
        }),
        n if n > expected => Err(FrameError::Trailing(n - expected)),
        _ => Ok(body),
    }
}

/// Reassembles a frame from partial link-layer writes
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the frame assembled so far
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Write `chunk` at `offset`; returns the whole frame once complete
    ///
    /// A write at offset 0 always starts a new frame.
    pub fn push(&mut self, offset: usize, chunk: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        if offset == 0 {
            self.buffer.clear();
        }
        if offset != self.buffer.len() {
            let actual = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::Truncated {
                expected: offset,
                actual,
            });
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        if self.buffer[0] != FRAME_VERSION {
            let version = self.buffer[0];
            self.buffer.clear();
            return Err(FrameError::Version(version));
        }

        let expected = u16::from_be_bytes([self.buffer[1], self.buffer[2]]) as usize;
        if expected > MAX_FRAME_PAYLOAD {
            self.buffer.clear();
            return Err(FrameError::TooLarge(expected));
        }

        let total = FRAME_HEADER_LEN + expected;
        match self.buffer.len() {
            n if n < total => Ok(None),
            n if n > total => {
                self.buffer.clear();
                Err(FrameError::Trailing(n - total))
            }
            _ => Ok(Some(std::mem::take(&mut self.buffer))),
        }
    }
}

/// Build the framed credential request for one exchange attempt
pub fn encode_request(exchange_id: Uuid, attempt: u32) -> Result<Vec<u8>, ExchangeError> {
    let message = DeviceMessage::CredentialRequest {
        exchange_id,
        attempt,
    };
    let payload =
        serde_json::to_vec(&message).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
    Ok(encode_frame(&payload)?)
}

/// Parse a framed peer response
pub fn decode_response(frame: &[u8]) -> Result<PeerMessage, ExchangeError> {
    let payload = decode_frame(frame)?;
    serde_json::from_slice(payload).map_err(|e| ExchangeError::Malformed(e.to_string()))
}

/// Frame an offer; used by peers and test harnesses
pub fn encode_offer(offer: &CredentialOffer) -> Result<Vec<u8>, ExchangeError> {
    let payload =
        serde_json::to_vec(offer).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
    Ok(encode_frame(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_header() {
        let frame = encode_frame(b"{}").unwrap();
        assert_eq!(frame, vec![1, 0, 2, b'{', b'}']);
        assert_eq!(decode_frame(&frame).unwrap(), b"{}");
    }

    #[test]
    fn test_frame_errors() {
        assert_eq!(
            decode_frame(&[1, 0]),
            Err(FrameError::Truncated {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(decode_frame(&[2, 0, 0]), Err(FrameError::Version(2)));
        assert_eq!(
            decode_frame(&[1, 0, 4, b'{', b'}']),
            Err(FrameError::Truncated {
                expected: 4,
                actual: 2
            })
        );
        assert_eq!(
            decode_frame(&[1, 0, 1, b'{', b'}']),
            Err(FrameError::Trailing(1))
        );
        assert_eq!(
            encode_frame(&vec![0u8; MAX_FRAME_PAYLOAD + 1]),
            Err(FrameError::TooLarge(MAX_FRAME_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_request_wire_format() {
        let id = Uuid::nil();
        let frame = encode_request(id, 2).unwrap();
        let json: serde_json::Value = serde_json::from_slice(decode_frame(&frame).unwrap()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "credential_request",
                "exchangeId": "00000000-0000-0000-0000-000000000000",
                "attempt": 2,
            })
        );
    }

    #[test]
    fn test_decode_offer_without_exchange_id() {
        let frame = encode_frame(br#"{"networkName":"HomeNet","secret":"s3cret123"}"#).unwrap();
        let message = decode_response(&frame).unwrap();

        assert_eq!(
            message,
            PeerMessage::Offer(CredentialOffer {
                network_name: "HomeNet".into(),
                secret: "s3cret123".into(),
                open: false,
                exchange_id: None,
            })
        );
    }

    #[test]
    fn test_decode_refusal() {
        let frame = encode_frame(br#"{"refused":true,"reason":"no wifi"}"#).unwrap();
        let message = decode_response(&frame).unwrap();

        assert!(matches!(
            message,
            PeerMessage::Refusal(Refusal { refused: true, .. })
        ));
    }

    #[test]
    fn test_decode_empty_object_is_malformed() {
        let frame = encode_frame(b"{}").unwrap();
        assert!(matches!(
            decode_response(&frame),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode_response(b"\x01\x00\x03abc"),
            Err(ExchangeError::Malformed(_))
        ));
        assert!(matches!(
            decode_response(b"hello"),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn test_assembler_partial_writes() {
        let frame = encode_frame(br#"{"networkName":"HomeNet"}"#).unwrap();
        let mut assembler = FrameAssembler::new();

        assert_eq!(assembler.push(0, &frame[..2]).unwrap(), None);
        assert_eq!(assembler.push(2, &frame[2..10]).unwrap(), None);
        assert_eq!(
            assembler.push(10, &frame[10..]).unwrap(),
            Some(frame.clone())
        );

        // offset 0 restarts
        assembler.push(0, &frame[..5]).unwrap();
        assert_eq!(assembler.push(0, &frame).unwrap(), Some(frame));
    }

    #[test]
    fn test_assembler_rejects_gaps() {
        let frame = encode_frame(b"{}").unwrap();
        let mut assembler = FrameAssembler::new();
        assembler.push(0, &frame[..1]).unwrap();

        assert!(assembler.push(3, &frame[3..]).is_err());
        // buffer was reset, a fresh frame still works
        assert_eq!(assembler.push(0, &frame).unwrap(), Some(frame));
    }
}
