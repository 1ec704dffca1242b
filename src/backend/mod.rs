//! Network stack abstraction layer

#[cfg(test)]
pub mod mock_network;
pub mod network_stack;
pub mod wifi_ctrl_backend;

pub use network_stack::NetworkStack;
pub use wifi_ctrl_backend::WifiCtrlBackend;

#[cfg(test)]
pub use mock_network::MockNetworkStack;
