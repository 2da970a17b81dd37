use std::fmt;
use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{Result, RpcError};

/// Transport-agnostic payload of one call or response.
pub enum CallData {
    /// A value encoded as text.
    Encoded(String),
    /// A streamed binary payload.
    Binary(BinaryStream),
    /// A failure reported by the other side.
    Error(ErrorPayload),
}

impl CallData {
    pub fn encoded(text: impl Into<String>) -> Self {
        Self::Encoded(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Encoded(_) => "encoded",
            Self::Binary(_) => "binary",
            Self::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The encoded text. An error payload is re-raised as the error it carries.
    pub fn into_encoded(self) -> Result<String> {
        match self {
            Self::Encoded(text) => Ok(text),
            Self::Error(payload) => Err(payload.into()),
            Self::Binary(_) => Err(RpcError::UnexpectedCallData {
                expected: "encoded",
                found: "binary",
            }),
        }
    }

    /// The binary stream. An error payload is re-raised as the error it carries.
    pub fn into_binary(self) -> Result<BinaryStream> {
        match self {
            Self::Binary(stream) => Ok(stream),
            Self::Error(payload) => Err(payload.into()),
            Self::Encoded(_) => Err(RpcError::UnexpectedCallData {
                expected: "binary",
                found: "encoded",
            }),
        }
    }
}

impl fmt::Debug for CallData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoded(text) => f.debug_tuple("Encoded").field(text).finish(),
            Self::Binary(_) => f.write_str("Binary(..)"),
            Self::Error(payload) => f.debug_tuple("Error").field(payload).finish(),
        }
    }
}

impl From<&RpcError> for CallData {
    fn from(err: &RpcError) -> Self {
        Self::Error(ErrorPayload::from(err))
    }
}

/// Readable byte stream carried as a call argument or result.
pub struct BinaryStream {
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl BinaryStream {
    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            inner: Box::pin(reader),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_reader(Cursor::new(bytes.into()))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Read the remaining stream into memory.
    pub async fn read_to_end(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        AsyncReadExt::read_to_end(&mut self, &mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for BinaryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for BinaryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BinaryStream")
    }
}

/// Wire form of a failed call, carried by error-tagged packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorPayload {
    EndpointNotFound { endpoint: String, service: String },
    Remote { message: String },
}

impl ErrorPayload {
    /// Decode an error payload; text that is not a known payload becomes a
    /// remote failure carrying that text.
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| Self::Remote {
            message: text.to_string(),
        })
    }
}

impl From<&RpcError> for ErrorPayload {
    fn from(err: &RpcError) -> Self {
        match err {
            RpcError::EndpointNotFound { endpoint, service } => Self::EndpointNotFound {
                endpoint: endpoint.clone(),
                service: service.clone(),
            },
            RpcError::Remote(message) => Self::Remote {
                message: message.clone(),
            },
            other => Self::Remote {
                message: error_chain(other),
            },
        }
    }
}

impl From<ErrorPayload> for RpcError {
    fn from(payload: ErrorPayload) -> Self {
        match payload {
            ErrorPayload::EndpointNotFound { endpoint, service } => {
                RpcError::EndpointNotFound { endpoint, service }
            }
            ErrorPayload::Remote { message } => RpcError::Remote(message),
        }
    }
}

/// Render an error and its sources, joined with `": "`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // thiserror `{0}` messages already embed their source.
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
