//! Game protocol networking: framing, sessions, the acceptor and the
//! client registry

pub mod codec;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use handler::ProtocolHandler;
pub use registry::ClientRegistry;
pub use server::Acceptor;
