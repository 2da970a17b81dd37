//! Services pinned to a dedicated worker task.
//!
//! Calls to a worker-hosted service are queued and executed one at a time,
//! in arrival order, by a single task that owns the service. A handler that
//! calls back into its own worker-hosted service (directly or through the
//! remote peer) waits on itself and never completes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::call_data::CallData;
use crate::channel::TransformContext;
use crate::error::{Result, RpcError};
use crate::service::HostedService;

/// Jobs queued per worker before callers wait.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

enum Job {
    Call {
        ctx: TransformContext,
        endpoint: String,
        data: CallData,
        reply: oneshot::Sender<Result<CallData>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a service running on its own worker task.
pub struct DedicatedService {
    name: String,
    jobs: mpsc::Sender<Job>,
}

/// Move `service` onto a dedicated worker task.
///
/// Must be called from within a Tokio runtime. The worker stops after the
/// service has been closed or once every handle is dropped.
pub fn spawn_dedicated(service: Arc<dyn HostedService>) -> Arc<dyn HostedService> {
    spawn_dedicated_with_depth(service, DEFAULT_QUEUE_DEPTH)
}

pub fn spawn_dedicated_with_depth(
    service: Arc<dyn HostedService>,
    depth: usize,
) -> Arc<dyn HostedService> {
    let name = service.service_name().to_string();
    let (jobs, queue) = mpsc::channel(depth.max(1));
    tokio::spawn(run_worker(service, queue));
    Arc::new(DedicatedService { name, jobs })
}

async fn run_worker(service: Arc<dyn HostedService>, mut queue: mpsc::Receiver<Job>) {
    let name = service.service_name().to_string();
    debug!(service = %name, "worker started");
    while let Some(job) = queue.recv().await {
        match job {
            Job::Call {
                ctx,
                endpoint,
                data,
                reply,
            } => {
                trace!(service = %name, endpoint = %endpoint, "worker call");
                let result = AssertUnwindSafe(service.call(&ctx, &endpoint, data))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(RpcError::from_panic(panic)));
                let _ = reply.send(result);
            }
            Job::Close { reply } => {
                service.close().await;
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!(service = %name, "worker stopped");
}

impl DedicatedService {
    fn stopped(&self) -> RpcError {
        RpcError::closed(format!("worker for service '{}' has stopped", self.name))
    }
}

#[async_trait]
impl HostedService for DedicatedService {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &TransformContext, endpoint: &str, data: CallData) -> Result<CallData> {
        let (reply, response) = oneshot::channel();
        let job = Job::Call {
            ctx: ctx.clone(),
            endpoint: endpoint.to_string(),
            data,
            reply,
        };
        self.jobs.send(job).await.map_err(|_| self.stopped())?;
        response.await.map_err(|_| self.stopped())?
    }

    async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.jobs.send(Job::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
    }
}
