//! JSON-RPC 2.0 message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{CommandError, StoreError};
use crate::protocol::{notification::Notification, request::Request, response::Response};

/// JSON-RPC 2.0 request wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: RequestId,
}

/// JSON-RPC 2.0 response wrapper
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

/// JSON-RPC 2.0 notification wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Request ID (number or string)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// Used when the request id could not be read
    Null,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes
impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Custom error codes
    pub const UNKNOWN_PEER: i32 = -32001;
    pub const INVALID_STATE: i32 = -32002;
    pub const STORE_ERROR: i32 = -32003;
    pub const UNAVAILABLE: i32 = -32004;

    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found() -> Self {
        Self::new(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub fn unknown_peer(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN_PEER, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_STATE, message)
    }

    pub fn store_error(message: impl Into<String>) -> Self {
        Self::new(Self::STORE_ERROR, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::UNAVAILABLE, message)
    }
}

impl From<CommandError> for JsonRpcError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::UnknownPeer(_) => Self::unknown_peer(e.to_string()),
            CommandError::NotConnected(_) | CommandError::ExchangeInProgress(_) => {
                Self::invalid_state(e.to_string())
            }
            CommandError::DispatcherStopped => Self::unavailable(e.to_string()),
        }
    }
}

impl From<StoreError> for JsonRpcError {
    fn from(e: StoreError) -> Self {
        Self::store_error(e.to_string())
    }
}

impl JsonRpcRequest {
    pub fn new(request: Request, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            request,
            id,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(result: Response, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(notification: Notification) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::types::{PeerId, SessionState},
        protocol::{
            notification::SessionFinishedParams,
            request::PeerParams,
            response::AckResponse,
        },
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JsonRpcRequest::new(Request::GetStatus, RequestId::Number(1));
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"get_status""#));
        assert!(json.contains(r#""id":1"#));

        let deserialized: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, request);
    }

    #[test]
    fn test_jsonrpc_request_with_params() {
        let json = r#"{"jsonrpc":"2.0","method":"restart_exchange","params":{"peer_id":"AA"},"id":"abc-123"}"#;
        let request: JsonRpcRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.id, RequestId::String("abc-123".to_string()));
        assert_eq!(
            request.request,
            Request::RestartExchange(PeerParams {
                peer_id: PeerId::from("AA")
            })
        );
    }

    #[test]
    fn test_jsonrpc_response_success() {
        let response =
            JsonRpcResponse::success(Response::Ack(AckResponse::ok()), RequestId::Number(1));
        let json = serde_json::to_string(&response).unwrap();

        assert_eq!(json, r#"{"jsonrpc":"2.0","result":{"status":"ok"},"id":1}"#);
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let response = JsonRpcResponse::error(
            CommandError::UnknownPeer(PeerId::from("AA")).into(),
            RequestId::Number(1),
        );
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains(r#""error""#));
        assert!(json.contains(r#""code":-32001"#));
        assert!(!json.contains(r#""result""#));
    }

    #[test]
    fn test_jsonrpc_notification() {
        let notif = JsonRpcNotification::new(Notification::SessionFinished(SessionFinishedParams {
            peer_id: PeerId::from("AA"),
            state: SessionState::Succeeded,
            attempts: 1,
            error_kind: None,
            error: None,
        }));
        let json = serde_json::to_string(&notif).unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""method":"session_finished""#));
        assert!(!json.contains(r#""id""#)); // notifications don't have id

        let deserialized: JsonRpcNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, notif);
    }

    #[test]
    fn test_command_error_codes() {
        let err: JsonRpcError = CommandError::ExchangeInProgress(PeerId::from("AA")).into();
        assert_eq!(err.code, JsonRpcError::INVALID_STATE);
        assert!(err.message.contains("in progress"));

        let err: JsonRpcError = CommandError::DispatcherStopped.into();
        assert_eq!(err.code, JsonRpcError::UNAVAILABLE);
    }
}
