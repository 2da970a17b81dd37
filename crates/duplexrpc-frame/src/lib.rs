//! Packet model and framing for duplexrpc.
//!
//! Every logical message is a [`Packet`]: a channel id, a message id, an
//! endpoint name, bit-packed [`PacketFlags`] and an opaque payload. Byte-stream
//! transports carry packets in a header-style framing:
//!
//! ```text
//! Method: greet\r\n
//! Channel-Id: \r\n
//! Message-Id: 7\r\n
//! Flags: 1\r\n
//! Type: NORMAL\r\n
//! Content-Length: 17\r\n
//! \r\n
//! ["Hello","world"]
//! ```
//!
//! The [`PacketTransport`] trait is the only thing the RPC layer needs from a
//! transport: ordered send, ordered receive, close.

pub mod codec;
pub mod error;
pub mod memory;
pub mod packet;
pub mod transport;

pub use codec::{
    decode_packet, encode_packet, FrameConfig, PacketCodec, DEFAULT_MAX_HEADER,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use packet::{Packet, PacketFlags};
pub use transport::{PacketTransport, StreamTransport};
