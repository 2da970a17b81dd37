//! Service registration and call routing surfaces of a connection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::call_data::CallData;
use crate::error::{Result, RpcError};
use crate::service::HostedService;

/// Opaque identifier of one registered service instance on a connection.
///
/// The empty id addresses the connection's default service.
pub type ChannelId = String;

/// Hosting side: local services the remote peer can call.
#[async_trait]
pub trait ChannelHost: Send + Sync {
    /// Install the unnamed service that requests with an empty channel id reach.
    fn register_default(&self, service: Arc<dyn HostedService>);

    /// Install a service under a fresh channel id.
    fn register_host(&self, service: Arc<dyn HostedService>) -> ChannelId;

    /// Remove and close one registered service. Returns false if `id` was unknown.
    async fn close_service(&self, id: &str) -> bool;

    /// Resolve a channel id; the empty id resolves to the default service.
    fn lookup(&self, id: &str) -> Option<Arc<dyn HostedService>>;
}

/// Calling side: issues requests against remote channel ids.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Send one request and wait for its response.
    async fn call(&self, channel_id: &str, endpoint: &str, data: CallData) -> Result<CallData>;

    /// Client-side channel bound to a remote channel id.
    fn wrap_channel(self: Arc<Self>, id: ChannelId) -> Arc<dyn SerializedChannel>;

    /// Context handed to transformers for calls made through this client.
    fn context(&self) -> TransformContext;
}

/// A multiplexed connection that both hosts services and issues calls.
#[async_trait]
pub trait Connection: ChannelHost + ChannelClient {
    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Channel used by generated stubs to reach one remote service instance.
#[async_trait]
pub trait SerializedChannel: Send + Sync {
    async fn call(&self, endpoint: &str, data: CallData) -> Result<CallData>;

    fn context(&self) -> TransformContext;

    /// Release the remote service instance.
    async fn close(&self) -> Result<()>;
}

/// Capabilities available to a [`Transformer`](crate::Transformer).
///
/// Only sub-service references need either side: hosting to register a
/// passed service, calling to build a stub for a received one.
#[derive(Clone, Default)]
pub struct TransformContext {
    host: Option<Arc<dyn ChannelHost>>,
    client: Option<Arc<dyn ChannelClient>>,
}

impl TransformContext {
    pub fn new(host: Option<Arc<dyn ChannelHost>>, client: Option<Arc<dyn ChannelClient>>) -> Self {
        Self { host, client }
    }

    pub fn with_host(mut self, host: Arc<dyn ChannelHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ChannelClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn host(&self) -> Result<&Arc<dyn ChannelHost>> {
        self.host
            .as_ref()
            .ok_or(RpcError::MissingCapability("host services"))
    }

    pub fn client(&self) -> Result<&Arc<dyn ChannelClient>> {
        self.client
            .as_ref()
            .ok_or(RpcError::MissingCapability("issue calls"))
    }
}

impl std::fmt::Debug for TransformContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformContext")
            .field("host", &self.host.is_some())
            .field("client", &self.client.is_some())
            .finish()
    }
}
