use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::call_data::CallData;
use crate::channel::{SerializedChannel, TransformContext};
use crate::error::{Result, RpcError};
use crate::transformer::Transformer;

type Invoker<T, I, O> = Arc<dyn Fn(Arc<T>, I) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// Descriptor of one remotely callable endpoint of service type `T`.
///
/// Built once per endpoint and never mutated afterwards.
pub struct RpcMethod<T: ?Sized, I, O> {
    endpoint: String,
    input: Transformer<I>,
    output: Transformer<O>,
    invoker: Invoker<T, I, O>,
}

impl<T, I, O> RpcMethod<T, I, O>
where
    T: ?Sized + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create an endpoint descriptor.
    ///
    /// Fails with [`RpcError::UnsupportedBinaryCombination`] when both the
    /// input and the output would be streamed as binary data.
    pub fn new<F, Fut>(
        endpoint: impl Into<String>,
        input: Transformer<I>,
        output: Transformer<O>,
        invoker: F,
    ) -> Result<Self>
    where
        F: Fn(Arc<T>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let endpoint = endpoint.into();
        if input.is_binary() && output.is_binary() {
            return Err(RpcError::UnsupportedBinaryCombination { endpoint });
        }
        Ok(Self {
            endpoint,
            input,
            output,
            invoker: Arc::new(move |service: Arc<T>, input: I| {
                Box::pin(invoker(service, input)) as BoxFuture<'static, Result<O>>
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn input(&self) -> &Transformer<I> {
        &self.input
    }

    pub fn output(&self) -> &Transformer<O> {
        &self.output
    }

    /// Hosting side: decode the input, run the service method, encode the output.
    pub async fn call(
        &self,
        ctx: &TransformContext,
        service: Arc<T>,
        data: CallData,
    ) -> Result<CallData> {
        let input = self.input.untransform(data, ctx)?;
        let output = (self.invoker)(service, input).await?;
        self.output.transform(output, ctx)
    }

    /// Calling side: encode the input, call the endpoint through `channel`,
    /// decode the response.
    pub async fn call_remote(&self, channel: &dyn SerializedChannel, input: I) -> Result<O> {
        let ctx = channel.context();
        let data = self.input.transform(input, &ctx)?;
        let response = channel.call(&self.endpoint, data).await?;
        self.output.untransform(response, &ctx)
    }
}

/// Endpoint of service type `T` with its argument and result types erased.
#[async_trait]
pub trait Endpoint<T: ?Sized>: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, ctx: &TransformContext, service: Arc<T>, data: CallData)
        -> Result<CallData>;
}

#[async_trait]
impl<T, I, O> Endpoint<T> for RpcMethod<T, I, O>
where
    T: ?Sized + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn call(
        &self,
        ctx: &TransformContext,
        service: Arc<T>,
        data: CallData,
    ) -> Result<CallData> {
        RpcMethod::call(self, ctx, service, data).await
    }
}
