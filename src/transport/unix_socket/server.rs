//! Unix socket server implementation

use listenfd::ListenFd;
use std::{fs::Permissions, os::unix::fs::PermissionsExt, path::Path};
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::{broadcast, mpsc},
};
use tracing::{debug, error, info, warn};

use crate::{
    core::{
        dispatcher::{DispatcherHandle, DispatcherNotice},
        error::{TransportError, TransportResult},
    },
    protocol::{JsonRpcNotification, Notification},
    transport::unix_socket::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
};

/// Status socket server
///
/// Answers JSON-RPC requests and pushes dispatcher notices to every
/// connected client.
pub struct UnixSocketServer {
    listener: UnixListener,
    handler: RequestHandler,
    dispatcher: DispatcherHandle,
}

impl UnixSocketServer {
    /// Serve on a listener inherited through socket activation, if any
    pub fn inherited(
        handler: RequestHandler,
        dispatcher: DispatcherHandle,
    ) -> TransportResult<Option<Self>> {
        let mut fds = ListenFd::from_env();
        let Some(listener) = fds
            .take_unix_listener(0)
            .map_err(|e| TransportError::Activation(e.to_string()))?
        else {
            return Ok(None);
        };

        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Activation(e.to_string()))?;
        let listener =
            UnixListener::from_std(listener).map_err(|e| TransportError::Activation(e.to_string()))?;

        info!("Status socket inherited from service manager");
        Ok(Some(Self {
            listener,
            handler,
            dispatcher,
        }))
    }

    /// Bind a fresh socket at `path` with file mode `mode`
    pub async fn bind(
        path: &Path,
        mode: u32,
        handler: RequestHandler,
        dispatcher: DispatcherHandle,
    ) -> TransportResult<Self> {
        // Remove a stale socket file left by a previous run
        if fs::try_exists(path).await? {
            fs::remove_file(path).await?;
        }

        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, Permissions::from_mode(mode)).await?;
        info!("Status socket listening on {} (mode {:o})", path.display(), mode);

        Ok(Self {
            listener,
            handler,
            dispatcher,
        })
    }

    /// Accept clients until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    let notices = self.dispatcher.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler, notices).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    handler: RequestHandler,
    mut notices: broadcast::Receiver<DispatcherNotice>,
) -> TransportResult<()> {
    let (read_half, write_half) = stream.into_split();
    let mut session = UnixSocketSession::new(write_half);
    let mut reader = SessionReader::new(read_half);

    info!("New client connected: {}", session.id());

    // Lines are read in their own task so waiting for notices never
    // interrupts a partially read request.
    let (line_tx, mut lines) = mpsc::channel(8);
    let read_task = tokio::spawn(async move {
        loop {
            let line = reader.read_line().await;
            let last = !matches!(line, Ok(Some(_)));
            if line_tx.send(line).await.is_err() || last {
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Ok(Some(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = handler.handle_line(&line).await;
                    if let Err(e) = session.send_response(&response).await {
                        break Err(e);
                    }
                }
                Some(Ok(None)) | None => break Ok(()),
                Some(Err(e)) => break Err(e),
            },
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    let notification = JsonRpcNotification::new(Notification::from(&notice));
                    if let Err(e) = session.send_notification(&notification).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Client {} missed {} notifications", session.id(), missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Dispatcher stopped, closing client {}", session.id());
                    break Ok(());
                }
            },
        }
    };

    read_task.abort();
    info!("Client disconnected: {}", session.id());
    result
}
