//! Protocol message definitions

pub mod exchange;
pub mod jsonrpc;
pub mod notification;
pub mod request;
pub mod response;

pub use {
    exchange::{CredentialOffer, DeviceMessage, PeerMessage},
    jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    notification::{Notification, ProvisioningFinishedParams, SessionFinishedParams},
    request::{PeerParams, Request},
    response::{AckResponse, Response, StatusResponse, StoredNetwork, StoredNetworkResponse},
};
