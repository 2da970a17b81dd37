//! Byte-stream transport bindings for duplexrpc.
//!
//! This is the lowest layer of duplexrpc: it produces connected, ordered,
//! duplex byte streams. Packet framing and RPC multiplexing are built on top
//! of the streams returned here.
//!
//! - Unix domain sockets (Linux/macOS)

pub mod error;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use uds::{peer_credentials, UnixDomainSocket};
