use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::call_data::CallData;
use crate::channel::{SerializedChannel, TransformContext};
use crate::error::Result;
use crate::object::RpcObject;

/// Contract between a service type and the RPC core.
///
/// Usually implemented for `dyn Trait` by generated or hand-written glue:
/// the endpoint table comes from [`rpc_object`](Self::rpc_object) and
/// [`create_stub`](Self::create_stub) builds a client whose methods forward
/// to [`RpcMethod::call_remote`](crate::RpcMethod::call_remote).
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    fn rpc_object() -> &'static RpcObject<Self>;

    fn create_stub(channel: Arc<dyn SerializedChannel>) -> Arc<Self>;

    /// Called once when the hosting connection releases the instance.
    async fn close(&self) {}
}

/// Type-erased service instance registered on a connection.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn service_name(&self) -> &str;

    async fn call(&self, ctx: &TransformContext, endpoint: &str, data: CallData)
        -> Result<CallData>;

    async fn close(&self);
}

/// Hosts an `Arc<T: RpcService>`, running its `close` at most once.
pub struct ServiceHandle<T: RpcService + ?Sized> {
    service: Arc<T>,
    closed: AtomicBool,
}

impl<T: RpcService + ?Sized> ServiceHandle<T> {
    pub fn new(service: Arc<T>) -> Self {
        Self {
            service,
            closed: AtomicBool::new(false),
        }
    }

    pub fn erase(service: Arc<T>) -> Arc<dyn HostedService> {
        Arc::new(Self::new(service))
    }

    pub fn service(&self) -> &Arc<T> {
        &self.service
    }
}

#[async_trait]
impl<T: RpcService + ?Sized> HostedService for ServiceHandle<T> {
    fn service_name(&self) -> &str {
        T::rpc_object().name()
    }

    async fn call(
        &self,
        ctx: &TransformContext,
        endpoint: &str,
        data: CallData,
    ) -> Result<CallData> {
        let method = T::rpc_object().find_endpoint(endpoint)?;
        method.call(ctx, self.service.clone(), data).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(service = self.service_name(), "closing hosted service");
        RpcService::close(&*self.service).await;
    }
}
