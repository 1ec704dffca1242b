//! Core provisioning logic

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;
