//! JSON-RPC request handler for the status socket

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    core::{dispatcher::DispatcherHandle, store::CredentialStore},
    protocol::{
        AckResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PeerParams, Request,
        RequestId, Response, StatusResponse, StoredNetworkResponse,
    },
};

const KNOWN_METHODS: [&str; 4] = [
    "get_status",
    "get_stored_network",
    "cancel_exchange",
    "restart_exchange",
];

/// JSON-RPC request handler
#[derive(Clone)]
pub struct RequestHandler {
    dispatcher: DispatcherHandle,
    store: CredentialStore,
}

impl RequestHandler {
    pub fn new(dispatcher: DispatcherHandle, store: CredentialStore) -> Self {
        Self { dispatcher, store }
    }

    /// Parse one request line and answer it
    pub async fn handle_line(&self, line: &str) -> JsonRpcResponse {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!("Invalid JSON-RPC request: {}", e);
                reject(line, &e)
            }
        }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling {} request", request.request.method());

        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                JsonRpcError::invalid_request("Unsupported JSON-RPC version"),
                request.id,
            );
        }

        let id = request.id;
        let result = match request.request {
            Request::GetStatus => self.handle_get_status().await,
            Request::GetStoredNetwork => self.handle_get_stored_network().await,
            Request::CancelExchange(PeerParams { peer_id }) => self
                .dispatcher
                .cancel_exchange(peer_id)
                .await
                .map(|()| Response::Ack(AckResponse::ok()))
                .map_err(JsonRpcError::from),
            Request::RestartExchange(PeerParams { peer_id }) => self
                .dispatcher
                .restart_exchange(peer_id)
                .await
                .map(|()| Response::Ack(AckResponse::ok()))
                .map_err(JsonRpcError::from),
        };

        match result {
            Ok(response) => JsonRpcResponse::success(response, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    async fn handle_get_status(&self) -> Result<Response, JsonRpcError> {
        let snapshot = self.dispatcher.status().await?;
        Ok(Response::Status(StatusResponse::ok(snapshot)))
    }

    async fn handle_get_stored_network(&self) -> Result<Response, JsonRpcError> {
        let record = self.store.load().await?;
        Ok(Response::StoredNetwork(StoredNetworkResponse::ok(
            record.as_ref(),
        )))
    }
}

/// Build the error response for a line that is not a valid request
fn reject(line: &str, error: &serde_json::Error) -> JsonRpcResponse {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return JsonRpcResponse::error(JsonRpcError::parse_error(), RequestId::Null);
    };

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
        .unwrap_or(RequestId::Null);

    let error = match value.get("method").and_then(Value::as_str) {
        None => JsonRpcError::invalid_request("Missing method"),
        Some(method) if !KNOWN_METHODS.contains(&method) => JsonRpcError::method_not_found(),
        Some(_) => JsonRpcError::invalid_params(error.to_string()),
    };
    JsonRpcResponse::error(error, id)
}
