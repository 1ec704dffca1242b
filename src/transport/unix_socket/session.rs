//! Status socket client sessions

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::unix::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    core::{
        error::{TransportError, TransportResult},
        types::SessionId,
    },
    protocol::{JsonRpcNotification, JsonRpcResponse},
};

/// Longest request line a client may send
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Write side of a connected status client
///
/// Messages are newline-delimited JSON. Responses and notifications share
/// the stream, so only the client task writes to it.
#[derive(Debug)]
pub struct UnixSocketSession {
    id: SessionId,
    writer: OwnedWriteHalf,
}

impl UnixSocketSession {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            id: SessionId::new(),
            writer,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn send_response(&mut self, response: &JsonRpcResponse) -> TransportResult<()> {
        self.send(response).await
    }

    pub async fn send_notification(
        &mut self,
        notification: &JsonRpcNotification,
    ) -> TransportResult<()> {
        self.send(notification).await
    }

    async fn send(&mut self, message: &impl Serialize) -> TransportResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Read side of a connected status client
pub struct SessionReader {
    reader: BufReader<OwnedReadHalf>,
}

impl SessionReader {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next line; `None` at end of stream
    pub async fn read_line(&mut self) -> TransportResult<Option<String>> {
        let mut line = String::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_line(&mut line)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if line.len() > MAX_LINE_LEN {
            return Err(TransportError::Protocol(format!(
                "request line exceeds {MAX_LINE_LEN} bytes"
            )));
        }

        // Remove trailing newline
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        AckResponse, JsonRpcRequest, Notification, Request, RequestId, Response,
        SessionFinishedParams,
    };
    use crate::core::types::{PeerId, SessionState};
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_session_ids_unique() {
        let (client, server) = UnixStream::pair().unwrap();
        let a = UnixSocketSession::new(server.into_split().1);
        let b = UnixSocketSession::new(client.into_split().1);

        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_session_read_request() {
        let (client, server) = UnixStream::pair().unwrap();
        let (read_half, _write_half) = server.into_split();
        let mut reader = SessionReader::new(read_half);
        let (_client_read, mut client_write) = client.into_split();

        let request = JsonRpcRequest::new(Request::GetStatus, RequestId::Number(1));
        let json = serde_json::to_string(&request).unwrap();
        client_write.write_all(json.as_bytes()).await.unwrap();
        client_write.write_all(b"\r\n").await.unwrap();
        client_write.flush().await.unwrap();

        let line = reader.read_line().await.unwrap().unwrap();
        let received: JsonRpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_session_writes_lines() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut session = UnixSocketSession::new(server.into_split().1);
        let mut client_reader = SessionReader::new(client.into_split().0);

        session
            .send_response(&JsonRpcResponse::success(
                Response::Ack(AckResponse::ok()),
                RequestId::Number(3),
            ))
            .await
            .unwrap();
        session
            .send_notification(&JsonRpcNotification::new(Notification::SessionFinished(
                SessionFinishedParams {
                    peer_id: PeerId::from("AA"),
                    state: SessionState::Aborted,
                    attempts: 0,
                    error_kind: None,
                    error: None,
                },
            )))
            .await
            .unwrap();

        let first = client_reader.read_line().await.unwrap().unwrap();
        assert!(first.contains(r#""id":3"#));
        let second = client_reader.read_line().await.unwrap().unwrap();
        assert!(second.contains(r#""method":"session_finished""#));
    }

    #[tokio::test]
    async fn test_session_reader_eof() {
        let (client, server) = UnixStream::pair().unwrap();
        let (read_half, _) = server.into_split();
        let mut reader = SessionReader::new(read_half);

        drop(client);

        let line = reader.read_line().await.unwrap();
        assert!(line.is_none());
    }

    #[tokio::test]
    async fn test_session_reader_rejects_long_line() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut reader = SessionReader::new(server.into_split().0);
        let (_client_read, mut client_write) = client.into_split();

        let writer = tokio::spawn(async move {
            let long = vec![b'a'; MAX_LINE_LEN + 10];
            let _ = client_write.write_all(&long).await;
        });

        assert!(matches!(
            reader.read_line().await,
            Err(TransportError::Protocol(_))
        ));
        writer.abort();
    }
}
