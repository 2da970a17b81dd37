//! Bidirectional multiplexed RPC over packet transports.
//!
//! Either side of a [`PacketConnection`] can host services and call the
//! other side's services at the same time, with any number of calls in
//! flight. Services are described by an [`RpcObject`] of [`RpcMethod`]s whose
//! [`Transformer`]s turn typed values into [`CallData`]: encoded text, a
//! streamed binary payload, or a reference to another live service.

pub mod binary;
pub mod call_data;
pub mod channel;
pub mod config;
pub mod connection;
pub mod connector;
pub mod control;
pub mod error;
#[cfg(unix)]
pub mod listener;
pub mod method;
pub mod multi_channel;
pub mod object;
pub mod service;
pub mod subservice;
pub mod transformer;
pub mod worker;

pub use binary::BinaryChannels;
pub use call_data::{BinaryStream, CallData, ErrorPayload};
pub use channel::{
    ChannelClient, ChannelHost, ChannelId, Connection, SerializedChannel, TransformContext,
};
pub use config::{ConnectionConfig, DEFAULT_BINARY_BUFFER, DEFAULT_CHUNK_SIZE};
pub use connection::PacketConnection;
pub use connector::connect;
pub use control::CLOSE_ENDPOINT;
pub use error::{Result, RpcError};
#[cfg(unix)]
pub use listener::ConnectionListener;
pub use method::{Endpoint, RpcMethod};
pub use multi_channel::{MultiChannel, PendingReceive};
pub use object::{RpcObject, RpcObjectBuilder};
pub use service::{HostedService, RpcService, ServiceHandle};
pub use subservice::SubserviceChannel;
pub use transformer::Transformer;
pub use worker::{spawn_dedicated, DedicatedService};
