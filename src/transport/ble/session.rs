//! Per-peer BLE session state

use bluer::Address;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

use crate::protocol::exchange::{FrameAssembler, FrameError};

type Inbox = Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

/// Frames in flight between the device and one connected peer
#[derive(Debug)]
struct BleSession {
    /// Request frame the peer should read next
    outbox: Option<Vec<u8>>,
    /// Fired on the first read of `outbox`
    picked_up: Option<oneshot::Sender<()>>,
    assembler: FrameAssembler,
    inbox_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbox_rx: Inbox,
}

impl BleSession {
    fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            outbox: None,
            picked_up: None,
            assembler: FrameAssembler::new(),
            inbox_tx,
            inbox_rx: Arc::new(Mutex::new(inbox_rx)),
        }
    }
}

/// BLE sessions of all connected peers, keyed by device address
///
/// Shared between the link stack (send/receive side) and the GATT
/// characteristic handlers (peer side). Closing a session drops its inbox
/// sender and any pending pickup, which fails waiting sends and receives.
#[derive(Debug, Clone, Default)]
pub struct BleSessions {
    inner: Arc<Mutex<HashMap<Address, BleSession>>>,
}

impl BleSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session; false if one is already open
    pub async fn open(&self, address: Address) -> bool {
        let mut sessions = self.inner.lock().await;
        if sessions.contains_key(&address) {
            return false;
        }
        sessions.insert(address, BleSession::new());
        debug!("BLE session opened for {}", address);
        true
    }

    /// Close a session; false if none was open
    pub async fn close(&self, address: Address) -> bool {
        let closed = self.inner.lock().await.remove(&address).is_some();
        if closed {
            debug!("BLE session closed for {}", address);
        }
        closed
    }

    pub async fn is_open(&self, address: Address) -> bool {
        self.inner.lock().await.contains_key(&address)
    }

    /// Stage a frame for the peer to read
    ///
    /// The returned receiver resolves when the peer reads it. A frame that
    /// was still staged is replaced and its sender sees a failure. Responses
    /// written before this call, complete or partial, are discarded.
    pub async fn stage(&self, address: Address, frame: Vec<u8>) -> Option<oneshot::Receiver<()>> {
        let mut sessions = self.inner.lock().await;
        let session = sessions.get_mut(&address)?;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        session.inbox_tx = inbox_tx;
        session.inbox_rx = Arc::new(Mutex::new(inbox_rx));
        session.assembler = FrameAssembler::new();

        let (tx, rx) = oneshot::channel();
        session.outbox = Some(frame);
        session.picked_up = Some(tx);
        Some(rx)
    }

    /// Serve a read of the request characteristic
    ///
    /// Returns the staged frame from `offset` on, or an empty value when
    /// nothing is staged.
    pub async fn read_request(&self, address: Address, offset: usize) -> Option<Vec<u8>> {
        let mut sessions = self.inner.lock().await;
        let session = sessions.get_mut(&address)?;

        let Some(frame) = &session.outbox else {
            return Some(Vec::new());
        };
        let chunk = frame.get(offset..).map(<[u8]>::to_vec).unwrap_or_default();
        if let Some(picked_up) = session.picked_up.take() {
            let _ = picked_up.send(());
        }
        Some(chunk)
    }

    /// Apply a write to the response characteristic
    ///
    /// Returns Ok(true) when the write completed a frame, which is then
    /// queued for `receive`. A frame with a bad header or length is queued
    /// as received, so the exchange sees it and rejects it. `None` if the
    /// peer has no open session.
    pub async fn write_response(
        &self,
        address: Address,
        offset: usize,
        chunk: &[u8],
    ) -> Option<Result<bool, FrameError>> {
        let mut sessions = self.inner.lock().await;
        let session = sessions.get_mut(&address)?;

        let mut received = if offset == 0 {
            Vec::new()
        } else {
            session.assembler.buffered().to_vec()
        };
        received.extend_from_slice(chunk);

        Some(match session.assembler.push(offset, chunk) {
            Ok(Some(frame)) => {
                debug!("Frame of {} bytes received from {}", frame.len(), address);
                let _ = session.inbox_tx.send(frame);
                Ok(true)
            }
            Ok(None) => Ok(false),
            // out of order writes carry no frame of their own
            Err(e @ FrameError::Truncated { .. }) => Err(e),
            Err(e) => {
                debug!("Invalid frame of {} bytes received from {}", received.len(), address);
                let _ = session.inbox_tx.send(received);
                Err(e)
            }
        })
    }

    /// Inbox of complete frames from the peer
    pub async fn inbox(&self, address: Address) -> Option<Inbox> {
        self.inner
            .lock()
            .await
            .get(&address)
            .map(|session| session.inbox_rx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ExchangeError;
    use crate::protocol::exchange::{FRAME_VERSION, decode_response, encode_frame};
    use pretty_assertions::assert_eq;

    fn address() -> Address {
        Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01])
    }

    #[tokio::test]
    async fn test_open_close() {
        let sessions = BleSessions::new();
        assert!(sessions.open(address()).await);
        assert!(!sessions.open(address()).await);
        assert!(sessions.is_open(address()).await);

        assert!(sessions.close(address()).await);
        assert!(!sessions.close(address()).await);
    }

    #[tokio::test]
    async fn test_read_picks_up_staged_frame() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;

        assert_eq!(sessions.read_request(address(), 0).await, Some(vec![]));

        let picked_up = sessions.stage(address(), vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(
            sessions.read_request(address(), 0).await,
            Some(vec![1, 2, 3, 4])
        );
        assert_eq!(sessions.read_request(address(), 2).await, Some(vec![3, 4]));
        assert!(picked_up.await.is_ok());
    }

    #[tokio::test]
    async fn test_close_fails_pending_send() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;
        let picked_up = sessions.stage(address(), vec![1]).await.unwrap();

        sessions.close(address()).await;
        assert!(picked_up.await.is_err());
        assert!(sessions.stage(address(), vec![1]).await.is_none());
    }

    #[tokio::test]
    async fn test_long_write_reassembled() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;
        let frame = encode_frame(br#"{"networkName":"HomeNet"}"#).unwrap();

        assert_eq!(
            sessions.write_response(address(), 0, &frame[..8]).await,
            Some(Ok(false))
        );
        assert_eq!(
            sessions.write_response(address(), 8, &frame[8..]).await,
            Some(Ok(true))
        );

        let inbox = sessions.inbox(address()).await.unwrap();
        assert_eq!(inbox.lock().await.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn test_write_without_session() {
        let sessions = BleSessions::new();
        assert_eq!(sessions.write_response(address(), 0, &[1]).await, None);
    }

    #[tokio::test]
    async fn test_new_request_discards_earlier_responses() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;
        let late = encode_frame(br#"{"networkName":"LateNet"}"#).unwrap();
        sessions.write_response(address(), 0, &late).await;
        // half of a second response
        sessions.write_response(address(), 0, &late[..4]).await;

        sessions.stage(address(), vec![1]).await.unwrap();
        let fresh = encode_frame(br#"{"networkName":"HomeNet"}"#).unwrap();
        assert_eq!(
            sessions.write_response(address(), 0, &fresh).await,
            Some(Ok(true))
        );

        let inbox = sessions.inbox(address()).await.unwrap();
        let mut inbox = inbox.lock().await;
        assert_eq!(inbox.recv().await, Some(fresh));
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_version_reaches_inbox_as_malformed() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;
        let mut frame = encode_frame(br#"{"networkName":"HomeNet"}"#).unwrap();
        frame[0] = FRAME_VERSION + 1;

        assert_eq!(
            sessions.write_response(address(), 0, &frame).await,
            Some(Err(FrameError::Version(FRAME_VERSION + 1)))
        );

        let inbox = sessions.inbox(address()).await.unwrap();
        let received = inbox.lock().await.recv().await.unwrap();
        assert!(matches!(
            decode_response(&received),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_across_writes_reaches_inbox() {
        let sessions = BleSessions::new();
        sessions.open(address()).await;
        let frame = [FRAME_VERSION, 0xff, 0xff, b'{'];

        assert_eq!(
            sessions.write_response(address(), 0, &frame[..2]).await,
            Some(Ok(false))
        );
        assert!(matches!(
            sessions.write_response(address(), 2, &frame[2..]).await,
            Some(Err(FrameError::TooLarge(_)))
        ));

        let inbox = sessions.inbox(address()).await.unwrap();
        let received = inbox.lock().await.recv().await.unwrap();
        assert_eq!(received, frame.to_vec());
        assert!(matches!(
            decode_response(&received),
            Err(ExchangeError::Malformed(_))
        ));
    }
}
