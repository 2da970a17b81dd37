use std::path::Path;

use crate::config::ConnectionConfig;
use crate::connection::PacketConnection;
use crate::error::Result;

/// Connect to a listening peer over a Unix domain socket.
pub async fn connect(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<PacketConnection> {
    #[cfg(not(unix))]
    {
        let _ = config;
        let path = path.as_ref().to_path_buf();
        return Err(duplexrpc_transport::TransportError::Connect {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "duplexrpc-peer requires Unix domain sockets",
            ),
        }
        .into());
    }

    #[cfg(unix)]
    {
        let stream = duplexrpc_transport::UnixDomainSocket::connect(path).await?;
        Ok(PacketConnection::over_stream(stream, config))
    }
}
