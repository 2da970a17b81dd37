use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use duplexrpc_peer::ConnectionConfig;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the demo service on a Unix socket.
    Serve(ServeArgs),
    /// Issue one call and print the result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Connection tuning shared by `serve` and `call`.
#[derive(Args, Debug, Default)]
pub struct ConnArgs {
    /// Binary transfer chunk size in bytes.
    #[arg(long, env = "DUPLEXRPC_CHUNK_SIZE", value_name = "BYTES")]
    pub chunk_size: Option<usize>,
    /// Per-transfer receive buffer in bytes.
    #[arg(long, env = "DUPLEXRPC_BINARY_BUFFER", value_name = "BYTES")]
    pub binary_buffer: Option<usize>,
    /// Largest accepted packet payload in bytes.
    #[arg(long, env = "DUPLEXRPC_MAX_PAYLOAD", value_name = "BYTES")]
    pub max_payload: Option<usize>,
}

impl ConnArgs {
    pub fn to_config(&self) -> CliResult<ConnectionConfig> {
        let mut config = ConnectionConfig::default();
        if let Some(size) = nonzero("--chunk-size", self.chunk_size)? {
            config = config.with_chunk_size(size);
        }
        if let Some(size) = nonzero("--binary-buffer", self.binary_buffer)? {
            config = config.with_binary_buffer_size(size);
        }
        if let Some(size) = nonzero("--max-payload", self.max_payload)? {
            config.frame.max_payload_size = size;
        }
        Ok(config)
    }
}

fn nonzero(flag: &str, value: Option<usize>) -> CliResult<Option<usize>> {
    match value {
        Some(0) => Err(CliError::new(
            USAGE,
            format!("{flag} must be greater than zero"),
        )),
        other => Ok(other),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after the first connection closes.
    #[arg(long)]
    pub once: bool,
    #[command(flatten)]
    pub conn: ConnArgs,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Endpoint name.
    pub endpoint: String,
    /// Encoded JSON argument. Omit for endpoints without input.
    #[arg(long)]
    pub json: Option<String>,
    /// Target channel id. Empty addresses the default service.
    #[arg(long, short = 'c', default_value = "")]
    pub channel: String,
    /// Maximum time to wait for the result (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub conn: ConnArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}
