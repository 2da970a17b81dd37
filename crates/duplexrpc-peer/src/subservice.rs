use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::debug;

use crate::call_data::CallData;
use crate::channel::{ChannelClient, ChannelId, SerializedChannel, TransformContext};
use crate::control::CLOSE_ENDPOINT;
use crate::error::Result;

/// Client-side proxy for one remote service instance.
///
/// Wrapping a `SubserviceChannel` again does not nest: the new proxy talks to
/// the same base client and only records the longer id path. Every call goes
/// out as a single request addressed to the innermost channel id.
pub struct SubserviceChannel {
    base: Arc<dyn ChannelClient>,
    path: Vec<ChannelId>,
    this: Weak<SubserviceChannel>,
}

impl SubserviceChannel {
    pub(crate) fn new(base: Arc<dyn ChannelClient>, id: ChannelId) -> Arc<Self> {
        Self::with_path(base, vec![id])
    }

    fn with_path(base: Arc<dyn ChannelClient>, path: Vec<ChannelId>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base,
            path,
            this: this.clone(),
        })
    }

    /// Remote channel id this proxy addresses. Empty for a default service.
    pub fn channel_id(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Ids of every proxy this one was derived from, outermost first.
    pub fn path(&self) -> &[ChannelId] {
        &self.path
    }
}

#[async_trait]
impl SerializedChannel for SubserviceChannel {
    async fn call(&self, endpoint: &str, data: CallData) -> Result<CallData> {
        self.base.call(self.channel_id(), endpoint, data).await
    }

    fn context(&self) -> TransformContext {
        let ctx = self.base.context();
        match self.this.upgrade() {
            Some(this) => ctx.with_client(this),
            None => ctx,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.channel_id().is_empty() {
            return Ok(());
        }
        debug!(channel = self.channel_id(), "releasing remote service");
        self.base
            .call(self.channel_id(), CLOSE_ENDPOINT, CallData::encoded(""))
            .await?
            .into_encoded()
            .map(drop)
    }
}

#[async_trait]
impl ChannelClient for SubserviceChannel {
    async fn call(&self, channel_id: &str, endpoint: &str, data: CallData) -> Result<CallData> {
        self.base.call(channel_id, endpoint, data).await
    }

    fn wrap_channel(self: Arc<Self>, id: ChannelId) -> Arc<dyn SerializedChannel> {
        let mut path = self.path.clone();
        path.push(id);
        Self::with_path(self.base.clone(), path)
    }

    fn context(&self) -> TransformContext {
        SerializedChannel::context(self)
    }
}
