/// Errors that can occur while framing or transporting packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A header line is malformed or carries an unusable value.
    #[error("invalid packet header: {0}")]
    InvalidHeader(String),

    /// A required header field is absent.
    #[error("missing packet header field '{0}'")]
    MissingHeader(&'static str),

    /// The header block exceeds the configured maximum size.
    #[error("packet header too large ({size} bytes, max {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The flag byte has unknown bits or an impossible combination.
    #[error("invalid packet flags {0:#06b}")]
    InvalidFlags(u8),

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed, possibly in the middle of a packet.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
