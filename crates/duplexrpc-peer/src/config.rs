use duplexrpc_frame::FrameConfig;
use tracing::warn;

/// Default size of one outgoing binary chunk: 16 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Default per-transfer reassembly buffer: 64 KiB.
pub const DEFAULT_BINARY_BUFFER: usize = 64 * 1024;

pub const ENV_CHUNK_SIZE: &str = "DUPLEXRPC_CHUNK_SIZE";
pub const ENV_BINARY_BUFFER: &str = "DUPLEXRPC_BINARY_BUFFER";
pub const ENV_MAX_PAYLOAD: &str = "DUPLEXRPC_MAX_PAYLOAD";

/// Per-connection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bytes per outgoing binary chunk. Clamped to the frame payload limit.
    pub chunk_size: usize,
    /// Bytes buffered per incoming transfer before chunk handling waits on the reader.
    pub binary_buffer_size: usize,
    /// Limits for byte-stream framing.
    pub frame: FrameConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            binary_buffer_size: DEFAULT_BINARY_BUFFER,
            frame: FrameConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_binary_buffer_size(mut self, size: usize) -> Self {
        self.binary_buffer_size = size;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Defaults overridden by `DUPLEXRPC_*` environment variables.
    ///
    /// Values that are not positive integers are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = read_size(&lookup, ENV_CHUNK_SIZE) {
            self.chunk_size = value;
        }
        if let Some(value) = read_size(&lookup, ENV_BINARY_BUFFER) {
            self.binary_buffer_size = value;
        }
        if let Some(value) = read_size(&lookup, ENV_MAX_PAYLOAD) {
            self.frame.max_payload_size = value;
        }
        self
    }

    /// Chunk size actually used when streaming.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, self.frame.max_payload_size.max(1))
    }
}

fn read_size(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid size from environment");
            None
        }
    }
}
