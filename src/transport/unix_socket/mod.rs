//! Unix domain socket transport for local status and control

pub mod handler;
pub mod server;
pub mod session;

pub use {
    handler::RequestHandler,
    server::UnixSocketServer,
    session::{SessionReader, UnixSocketSession},
};
