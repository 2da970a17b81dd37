//! The multiplexing engine.
//!
//! A [`PacketConnection`] owns one receive loop per transport. Every received
//! packet is dispatched on its own task, so a slow handler never blocks
//! unrelated calls and handlers may call back into the remote peer while a
//! call of their own is outstanding. Outgoing calls are correlated by message
//! id through a [`MultiChannel`]; binary payloads travel as chunked transfers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use duplexrpc_frame::{FrameError, Packet, PacketFlags, PacketTransport, StreamTransport};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::binary::BinaryChannels;
use crate::call_data::{BinaryStream, CallData, ErrorPayload};
use crate::channel::{
    ChannelClient, ChannelHost, ChannelId, Connection, SerializedChannel, TransformContext,
};
use crate::config::ConnectionConfig;
use crate::control::CLOSE_ENDPOINT;
use crate::error::{Result, RpcError};
use crate::multi_channel::MultiChannel;
use crate::service::{HostedService, RpcService, ServiceHandle};
use crate::subservice::SubserviceChannel;

/// A bidirectional RPC connection over one packet transport.
///
/// Cheap to clone; all clones share the same connection. Both sides of a
/// connection are symmetric: either may host services and either may call.
#[derive(Clone)]
pub struct PacketConnection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn PacketTransport>,
    config: ConnectionConfig,
    services: Mutex<Services>,
    responses: MultiChannel<CallData>,
    binaries: BinaryChannels,
    /// Stops the receive loop and in-flight dispatch tasks.
    shutdown: CancellationToken,
    /// Cancelled once teardown has fully completed.
    terminated: CancellationToken,
    closing: AtomicBool,
}

#[derive(Default)]
struct Services {
    hosted: HashMap<ChannelId, Arc<dyn HostedService>>,
    default: Option<Arc<dyn HostedService>>,
    closed: bool,
}

/// What started a teardown; decides the order resources are released in.
#[derive(Debug, Clone, Copy)]
enum Teardown {
    /// `close()`: services, then pending calls, then incoming transfers.
    Local,
    /// The transport failed or hung up: transfers and pending calls first.
    Transport,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl PacketConnection {
    /// Wrap a transport and start its receive loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: impl PacketTransport + 'static, config: ConnectionConfig) -> Self {
        Self::from_arc(Arc::new(transport), config)
    }

    pub fn from_arc(transport: Arc<dyn PacketTransport>, config: ConnectionConfig) -> Self {
        Self::start(transport, config, None)
    }

    /// Wrap a transport with `service` already installed as the default
    /// service, so no request can arrive before it is reachable.
    pub fn serving(
        transport: Arc<dyn PacketTransport>,
        config: ConnectionConfig,
        service: Arc<dyn HostedService>,
    ) -> Self {
        Self::start(transport, config, Some(service))
    }

    fn start(
        transport: Arc<dyn PacketTransport>,
        config: ConnectionConfig,
        default: Option<Arc<dyn HostedService>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport: transport.clone(),
            binaries: BinaryChannels::new(config.binary_buffer_size),
            config,
            services: Mutex::new(Services {
                default,
                ..Services::default()
            }),
            responses: MultiChannel::new(),
            shutdown: CancellationToken::new(),
            terminated: CancellationToken::new(),
            closing: AtomicBool::new(false),
        });
        tokio::spawn(receive_loop(
            Arc::downgrade(&inner),
            transport,
            inner.shutdown.clone(),
        ));
        Self { inner }
    }

    /// Frame a byte stream (socket, pipe, `tokio::io::duplex`) and wrap it.
    pub fn over_stream<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_arc(framed(stream, &config), config)
    }

    /// Like [`over_stream`](Self::over_stream), hosting `service` from the start.
    pub fn over_stream_serving<S>(
        stream: S,
        config: ConnectionConfig,
        service: Arc<dyn HostedService>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::serving(framed(stream, &config), config, service)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been torn down, by either side.
    pub async fn closed(&self) {
        self.inner.terminated.cancelled().await;
    }

    /// Host `service` as this connection's default service.
    pub fn serve_default<T: RpcService + ?Sized>(&self, service: Arc<T>) {
        self.register_default(ServiceHandle::erase(service));
    }

    /// Stub for the remote peer's default service.
    pub fn remote_default<T: RpcService + ?Sized>(&self) -> Arc<T> {
        T::create_stub(Arc::new(self.clone()).wrap_channel(ChannelId::new()))
    }

    /// Number of services registered under a channel id, default excluded.
    pub fn hosted_count(&self) -> usize {
        self.inner.services.lock().hosted.len()
    }

    /// Tear the connection down: close every hosted service, fail pending
    /// calls, abort incoming transfers, then close the transport.
    ///
    /// Idempotent. Returns once teardown has completed.
    pub async fn close(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.teardown("connection closed locally", Teardown::Local).await;
        });
        self.inner.terminated.cancelled().await;
    }

    async fn teardown(&self, reason: impl Into<String>, cause: Teardown) {
        let reason = reason.into();
        if let Teardown::Transport = cause {
            // Also while a local close runs, whose service closes may be
            // waiting on calls nobody can answer now.
            self.inner.binaries.abort_all(&reason);
            self.inner.responses.close(reason.clone());
        }
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(reason = %reason, ?cause, "tearing down connection");

        match cause {
            Teardown::Local => {
                self.close_services().await;
                self.inner.responses.close(reason.clone());
                self.inner.binaries.abort_all(&reason);
                self.inner.shutdown.cancel();
            }
            Teardown::Transport => {
                self.inner.shutdown.cancel();
                self.close_services().await;
            }
        }

        self.inner.transport.close(Some(&reason)).await;
        self.inner.terminated.cancel();
    }

    async fn close_services(&self) {
        let services: Vec<Arc<dyn HostedService>> = {
            let mut services = self.inner.services.lock();
            services.closed = true;
            let default = services.default.take();
            services.hosted.drain().map(|(_, s)| s).chain(default).collect()
        };
        for service in services {
            close_quietly(service).await;
        }
    }

    fn spawn_dispatch(&self, packet: Packet) {
        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = this.dispatch(packet) => {}
            }
        });
    }

    async fn dispatch(&self, packet: Packet) {
        if packet.flags.is_binary_chunk() {
            match packet.sequence() {
                Ok(sequence) => {
                    self.inner
                        .binaries
                        .handle_chunk(&packet.channel_id, sequence, packet.payload)
                        .await
                }
                Err(err) => warn!(transfer = %packet.channel_id, error = %err, "dropping chunk"),
            }
        } else if packet.flags.is_request() {
            self.handle_request(packet).await;
        } else {
            self.handle_response(packet);
        }
    }

    async fn handle_request(&self, packet: Packet) {
        debug!(
            channel = %packet.channel_id,
            message = %packet.message_id,
            endpoint = %packet.endpoint,
            "incoming request"
        );
        let result = match self.incoming_data(&packet) {
            Ok(data) => self.serve(&packet.channel_id, &packet.endpoint, data).await,
            Err(err) => Err(err),
        };
        let reply = result.unwrap_or_else(|err| {
            debug!(endpoint = %packet.endpoint, error = %err, "request failed");
            CallData::from(&err)
        });

        let Packet {
            channel_id,
            message_id,
            endpoint,
            ..
        } = packet;
        if let Err(err) = self
            .send_data(channel_id, message_id, endpoint, PacketFlags::NONE, reply)
            .await
        {
            warn!(error = %err, "failed to send response");
        }
    }

    async fn serve(&self, channel_id: &str, endpoint: &str, data: CallData) -> Result<CallData> {
        if endpoint == CLOSE_ENDPOINT {
            if !channel_id.is_empty() {
                self.close_service(channel_id).await;
            }
            return Ok(CallData::encoded(""));
        }

        let service = self
            .lookup(channel_id)
            .ok_or_else(|| RpcError::UnknownChannel(channel_id.to_string()))?;
        let ctx = ChannelClient::context(self);
        AssertUnwindSafe(service.call(&ctx, endpoint, data))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RpcError::from_panic(panic)))
    }

    fn handle_response(&self, packet: Packet) {
        let Ok(id) = packet.message_id.parse::<u64>() else {
            trace!(message = %packet.message_id, "dropping response with foreign message id");
            return;
        };
        let data = self
            .incoming_data(&packet)
            .unwrap_or_else(|err| CallData::from(&err));
        if !self.inner.responses.send(id, data) {
            trace!(message = id, "dropping response with no pending call");
        }
    }

    /// Payload of a request or response packet as call data.
    fn incoming_data(&self, packet: &Packet) -> Result<CallData> {
        let text = packet.payload_str()?;
        if packet.flags.starts_binary() {
            return self
                .inner
                .binaries
                .claim(text)
                .map(CallData::Binary)
                .ok_or_else(|| {
                    RpcError::closed(format!("binary transfer '{text}' is no longer available"))
                });
        }
        if packet.flags.is_error() {
            return Ok(CallData::Error(ErrorPayload::parse(text)));
        }
        Ok(CallData::encoded(text))
    }

    async fn send_data(
        &self,
        channel_id: String,
        message_id: String,
        endpoint: String,
        flags: PacketFlags,
        data: CallData,
    ) -> Result<()> {
        match data {
            CallData::Encoded(text) => {
                self.send_packet(Packet::new(channel_id, message_id, endpoint, flags, text))
                    .await
            }
            CallData::Error(payload) => {
                let body = serde_json::to_string(&payload)?;
                let flags = flags | PacketFlags::ERROR;
                self.send_packet(Packet::new(channel_id, message_id, endpoint, flags, body))
                    .await
            }
            CallData::Binary(stream) => {
                self.send_binary(channel_id, message_id, endpoint, flags, stream)
                    .await
            }
        }
    }

    /// Announce a transfer, stream it in chunks, and end it with an empty chunk.
    ///
    /// The end chunk is sent even when reading the source fails part way, so
    /// the receiver never waits on a transfer that will not continue.
    async fn send_binary(
        &self,
        channel_id: String,
        message_id: String,
        endpoint: String,
        flags: PacketFlags,
        mut stream: BinaryStream,
    ) -> Result<()> {
        let transfer = Uuid::new_v4().to_string();
        let flags = flags | PacketFlags::STARTS_BINARY;
        self.send_packet(Packet::new(
            channel_id,
            message_id,
            endpoint,
            flags,
            transfer.clone(),
        ))
        .await?;

        let chunk_size = self.inner.config.effective_chunk_size();
        let mut buf = BytesMut::with_capacity(chunk_size);
        let mut sequence = 0u64;
        let mut failure = None;
        loop {
            buf.resize(chunk_size, 0);
            let read = match stream.read(&mut buf[..]).await {
                Ok(read) => read,
                Err(err) => {
                    warn!(transfer = %transfer, error = %err, "binary source failed, ending transfer");
                    failure = Some(err);
                    break;
                }
            };
            if read == 0 {
                break;
            }
            let chunk = buf.split_to(read).freeze();
            trace!(transfer = %transfer, sequence, len = read, "sending chunk");
            self.send_packet(Packet::chunk(transfer.clone(), sequence, chunk))
                .await?;
            sequence += 1;
        }
        self.send_packet(Packet::chunk(transfer, sequence, Bytes::new()))
            .await?;

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn send_packet(&self, packet: Packet) -> Result<()> {
        self.inner.transport.send(packet).await?;
        Ok(())
    }
}

fn framed<S>(stream: S, config: &ConnectionConfig) -> Arc<dyn PacketTransport>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    Arc::new(StreamTransport::from_stream(stream, config.frame.clone()))
}

async fn receive_loop(
    weak: Weak<Inner>,
    transport: Arc<dyn PacketTransport>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = transport.receive() => received,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let connection = PacketConnection { inner };
        match received {
            Ok(packet) => connection.spawn_dispatch(packet),
            Err(FrameError::ConnectionClosed) => {
                connection
                    .teardown("peer closed the connection", Teardown::Transport)
                    .await;
                break;
            }
            Err(err) => {
                warn!(error = %err, "receive loop failed");
                connection
                    .teardown(format!("transport failure: {err}"), Teardown::Transport)
                    .await;
                break;
            }
        }
    }
    trace!("receive loop stopped");
}

async fn close_quietly(service: Arc<dyn HostedService>) {
    let name = service.service_name().to_string();
    if AssertUnwindSafe(service.close()).catch_unwind().await.is_err() {
        warn!(service = %name, "service close panicked");
    }
}

/// Close a service registered after teardown so its close still runs.
fn close_late(service: Arc<dyn HostedService>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close_quietly(service));
        }
        Err(_) => debug!(
            service = service.service_name(),
            "dropping service registered after close"
        ),
    }
}

#[async_trait]
impl ChannelHost for PacketConnection {
    fn register_default(&self, service: Arc<dyn HostedService>) {
        let mut services = self.inner.services.lock();
        if services.closed {
            drop(services);
            close_late(service);
            return;
        }
        debug!(service = service.service_name(), "registering default service");
        if let Some(previous) = services.default.replace(service) {
            drop(services);
            close_late(previous);
        }
    }

    fn register_host(&self, service: Arc<dyn HostedService>) -> ChannelId {
        let id = Uuid::new_v4().to_string();
        let mut services = self.inner.services.lock();
        if services.closed {
            drop(services);
            close_late(service);
            return id;
        }
        debug!(service = service.service_name(), channel = %id, "hosting service");
        services.hosted.insert(id.clone(), service);
        id
    }

    async fn close_service(&self, id: &str) -> bool {
        let removed = self.inner.services.lock().hosted.remove(id);
        match removed {
            Some(service) => {
                debug!(channel = id, "releasing hosted service");
                close_quietly(service).await;
                true
            }
            None => false,
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<dyn HostedService>> {
        let services = self.inner.services.lock();
        if id.is_empty() {
            services.default.clone()
        } else {
            services.hosted.get(id).cloned()
        }
    }
}

#[async_trait]
impl ChannelClient for PacketConnection {
    async fn call(&self, channel_id: &str, endpoint: &str, data: CallData) -> Result<CallData> {
        if let Some(reason) = self.inner.responses.close_reason() {
            return Err(RpcError::closed(reason));
        }
        let (id, pending) = self.inner.responses.allocate_receive();
        debug!(channel = channel_id, endpoint, message = id, "outgoing call");
        self.send_data(
            channel_id.to_string(),
            id.to_string(),
            endpoint.to_string(),
            PacketFlags::REQUEST,
            data,
        )
        .await?;
        pending.await
    }

    fn wrap_channel(self: Arc<Self>, id: ChannelId) -> Arc<dyn SerializedChannel> {
        SubserviceChannel::new(self, id)
    }

    fn context(&self) -> TransformContext {
        TransformContext::new(Some(Arc::new(self.clone())), Some(Arc::new(self.clone())))
    }
}

#[async_trait]
impl Connection for PacketConnection {
    async fn close(&self) {
        PacketConnection::close(self).await;
    }
}

impl std::fmt::Debug for PacketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketConnection")
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.inner.responses.pending_count())
            .field("open_transfers", &self.inner.binaries.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use duplexrpc_frame::memory;

    use super::*;

    struct Echo;

    #[async_trait]
    impl HostedService for Echo {
        fn service_name(&self) -> &str {
            "Echo"
        }

        async fn call(
            &self,
            _ctx: &TransformContext,
            endpoint: &str,
            data: CallData,
        ) -> Result<CallData> {
            match endpoint {
                "echo" => Ok(data),
                "fail" => Err(RpcError::remote("it broke")),
                "panic" => panic!("handler exploded"),
                other => Err(RpcError::EndpointNotFound {
                    endpoint: other.to_string(),
                    service: "Echo".to_string(),
                }),
            }
        }

        async fn close(&self) {}
    }

    fn connected() -> (PacketConnection, PacketConnection) {
        let (a, b) = memory::pair();
        (
            PacketConnection::new(a, ConnectionConfig::default()),
            PacketConnection::new(b, ConnectionConfig::default()),
        )
    }

    #[tokio::test]
    async fn call_reaches_default_service() {
        let (client, server) = connected();
        server.register_default(Arc::new(Echo));

        let reply = ChannelClient::call(&client, "", "echo", CallData::encoded("\"hi\""))
            .await
            .unwrap();
        assert_eq!(reply.into_encoded().unwrap(), "\"hi\"");
    }

    #[tokio::test]
    async fn handler_errors_come_back_as_error_data() {
        let (client, server) = connected();
        server.register_default(Arc::new(Echo));

        let reply = ChannelClient::call(&client, "", "fail", CallData::encoded(""))
            .await
            .unwrap();
        assert!(reply.is_error());
        assert!(matches!(reply.into_encoded(), Err(RpcError::Remote(msg)) if msg == "it broke"));

        let reply = ChannelClient::call(&client, "", "panic", CallData::encoded(""))
            .await
            .unwrap();
        assert!(
            matches!(reply.into_encoded(), Err(RpcError::Remote(msg)) if msg.contains("handler exploded"))
        );
    }

    #[tokio::test]
    async fn unknown_channel_is_reported_to_caller() {
        let (client, _server) = connected();
        let reply = ChannelClient::call(&client, "nope", "echo", CallData::encoded(""))
            .await
            .unwrap();
        assert!(matches!(reply.into_encoded(), Err(RpcError::Remote(msg)) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn binary_response_is_streamed() {
        let (client, server) = connected();
        server.register_default(Arc::new(Echo));

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let reply = ChannelClient::call(
            &client,
            "",
            "echo",
            CallData::Binary(BinaryStream::from_bytes(payload.clone())),
        )
        .await
        .unwrap();
        let received = reply.into_binary().unwrap().read_to_end().await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn close_service_runs_once_and_unregisters() {
        let (_client, server) = connected();
        let id = server.register_host(Arc::new(Echo));
        assert_eq!(server.hosted_count(), 1);
        assert!(server.lookup(&id).is_some());

        assert!(server.close_service(&id).await);
        assert!(!server.close_service(&id).await);
        assert_eq!(server.hosted_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_and_later_calls() {
        let (client, server) = connected();
        let (tx, rx) = tokio::sync::oneshot::channel();

        struct Stall(parking_lot::Mutex<Option<tokio::sync::oneshot::Sender<()>>>);

        #[async_trait]
        impl HostedService for Stall {
            fn service_name(&self) -> &str {
                "Stall"
            }

            async fn call(&self, _: &TransformContext, _: &str, _: CallData) -> Result<CallData> {
                if let Some(tx) = self.0.lock().take() {
                    let _ = tx.send(());
                }
                std::future::pending().await
            }

            async fn close(&self) {}
        }

        server.register_default(Arc::new(Stall(parking_lot::Mutex::new(Some(tx)))));
        let pending = {
            let client = client.clone();
            tokio::spawn(async move {
                ChannelClient::call(&client, "", "wait", CallData::encoded("")).await
            })
        };
        rx.await.unwrap();

        client.close().await;
        assert!(client.is_closed());
        assert!(matches!(
            pending.await.unwrap(),
            Err(RpcError::Closed { .. })
        ));
        assert!(matches!(
            ChannelClient::call(&client, "", "echo", CallData::encoded("")).await,
            Err(RpcError::Closed { .. })
        ));

        tokio::time::timeout(Duration::from_secs(5), server.closed())
            .await
            .expect("remote side should observe the hangup");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, _server) = connected();
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
    }
}
