//! Bidirectional multiplexed RPC over packet transports.
//!
//! Both ends of a duplexrpc connection can host services and call the other
//! end's services at the same time, with many calls in flight, streamed
//! binary arguments and results, and live service references passed as
//! values.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream transports (Unix domain sockets)
//! - [`frame`]: the packet model, header-style framing and the transport contract
//! - [`peer`]: services, endpoints and the multiplexing connection (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use duplexrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use duplexrpc_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use duplexrpc_peer::*;
}
