//! Transports: the BLE link to peers and the local status socket

pub mod ble;
pub mod link_stack;
#[cfg(test)]
pub mod mock_link;
pub mod unix_socket;

pub use link_stack::{LinkEvent, LinkStack};
