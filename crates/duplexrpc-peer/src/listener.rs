use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use duplexrpc_transport::{peer_credentials, UnixDomainSocket};
use tokio::net::UnixStream;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::PacketConnection;
use crate::error::Result;
use crate::service::HostedService;

/// Accepts connections on a Unix domain socket.
pub struct ConnectionListener {
    socket: UnixDomainSocket,
    config: ConnectionConfig,
    next_peer_id: AtomicU64,
}

impl ConnectionListener {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            config: ConnectionConfig::default(),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Override the configuration of accepted connections.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection.
    ///
    /// Host services on the returned connection before the peer starts
    /// calling; requests that arrive earlier fail with an unknown channel.
    pub async fn accept(&self) -> Result<PacketConnection> {
        let stream = self.accept_stream().await?;
        Ok(PacketConnection::over_stream(stream, self.config.clone()))
    }

    /// Accept the next connection with `service` installed as its default
    /// service before the first request is read.
    pub async fn accept_serving(
        &self,
        service: Arc<dyn HostedService>,
    ) -> Result<PacketConnection> {
        let stream = self.accept_stream().await?;
        Ok(PacketConnection::over_stream_serving(
            stream,
            self.config.clone(),
            service,
        ))
    }

    async fn accept_stream(&self) -> Result<UnixStream> {
        let stream = self.socket.accept().await?;
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        match peer_credentials(&stream) {
            Some((uid, gid, pid)) => info!(peer = id, uid, gid, ?pid, "accepted peer"),
            None => info!(peer = id, "accepted peer"),
        }
        debug!(
            peer = id,
            transport = self.socket.transport_name(),
            path = ?self.socket.path(),
            "wrapping connection"
        );
        Ok(stream)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::channel::ChannelClient;
    use crate::connector::connect;
    use crate::CallData;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "drpc-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    #[tokio::test]
    async fn accepts_sequential_connections() {
        let sock_path = make_sock_path("multi");
        let listener = ConnectionListener::bind(&sock_path).expect("listener should bind");
        assert_eq!(listener.path(), sock_path.as_path());

        let (first, _c1) = tokio::join!(
            listener.accept(),
            connect(&sock_path, ConnectionConfig::default())
        );
        let (second, _c2) = tokio::join!(
            listener.accept(),
            connect(&sock_path, ConnectionConfig::default())
        );
        assert!(!first.expect("first accept should succeed").is_closed());
        assert!(!second.expect("second accept should succeed").is_closed());
        assert_eq!(listener.next_peer_id.load(Ordering::Relaxed), 3);

        drop(listener);
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn accept_serving_installs_default_service() {
        let sock_path = make_sock_path("config");
        let config = ConnectionConfig::default().with_chunk_size(1024);
        let listener = ConnectionListener::bind(&sock_path)
            .expect("listener should bind")
            .with_config(config.clone());

        struct Ping;

        #[async_trait::async_trait]
        impl crate::HostedService for Ping {
            fn service_name(&self) -> &str {
                "Ping"
            }

            async fn call(
                &self,
                _: &crate::TransformContext,
                _: &str,
                _: CallData,
            ) -> crate::Result<CallData> {
                Ok(CallData::encoded("\"pong\""))
            }

            async fn close(&self) {}
        }

        let (server, client) = tokio::join!(
            listener.accept_serving(Arc::new(Ping)),
            connect(&sock_path, ConnectionConfig::default())
        );
        let server = server.expect("accept should succeed");
        let client = client.expect("connect should succeed");
        assert_eq!(server.config(), &config);

        let reply = ChannelClient::call(&client, "", "ping", CallData::encoded(""))
            .await
            .expect("call should succeed");
        assert_eq!(reply.into_encoded().unwrap(), "\"pong\"");

        drop(listener);
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
