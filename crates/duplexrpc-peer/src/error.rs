use std::any::Any;

/// Errors that can occur in RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No endpoint with this name is registered on the service type.
    #[error("endpoint '{endpoint}' not found on service '{service}'")]
    EndpointNotFound { endpoint: String, service: String },

    /// The remote handler failed; carries its error trace.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] duplexrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] duplexrpc_frame::FrameError),

    /// The connection was torn down before the call completed.
    #[error("connection closed: {reason}")]
    Closed { reason: String },

    /// Binary framing on both input and output of one endpoint.
    #[error("endpoint '{endpoint}' cannot stream binary data in both directions")]
    UnsupportedBinaryCombination { endpoint: String },

    /// An endpoint name was registered twice on one service type.
    #[error("endpoint '{endpoint}' registered twice on service '{service}'")]
    DuplicateEndpoint { endpoint: String, service: String },

    /// Endpoint names starting with `$` are reserved for the connection itself.
    #[error("endpoint name '{0}' is reserved")]
    ReservedEndpoint(String),

    /// Call data of one kind was read as another.
    #[error("expected {expected} call data, got {found}")]
    UnexpectedCallData {
        expected: &'static str,
        found: &'static str,
    },

    /// The connection cannot host services or cannot issue calls.
    #[error("connection cannot {0}")]
    MissingCapability(&'static str),

    /// No service is registered under this channel id.
    #[error("no service registered for channel '{0}'")]
    UnknownChannel(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while streaming binary data.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Failure raised by a service handler.
    pub fn remote(message: impl std::fmt::Display) -> Self {
        Self::Remote(message.to_string())
    }

    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Remote(format!("handler panicked: {message}"))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
