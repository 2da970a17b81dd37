use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Result body of one completed call.
#[derive(Debug)]
pub enum Reply {
    /// Encoded result text; empty for endpoints without a result.
    Encoded(String),
    Binary(Vec<u8>),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Encoded(_) => "encoded",
            Reply::Binary(_) => "binary",
        }
    }

    fn size(&self) -> usize {
        match self {
            Reply::Encoded(text) => text.len(),
            Reply::Binary(bytes) => bytes.len(),
        }
    }

    /// The result as a JSON value: encoded text is parsed, binary data is
    /// shown as text when it is valid UTF-8.
    fn value(&self) -> Value {
        match self {
            Reply::Encoded(text) if text.is_empty() => Value::Null,
            Reply::Encoded(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.clone())),
            Reply::Binary(bytes) => Value::String(payload_preview(bytes)),
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    endpoint: &'a str,
    channel: &'a str,
    kind: &'static str,
    size: usize,
    value: Value,
}

pub fn print_reply(endpoint: &str, channel: &str, reply: &Reply, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                endpoint,
                channel,
                kind: reply.kind(),
                size: reply.size(),
                value: reply.value(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "CHANNEL", "KIND", "SIZE", "RESULT"])
                .add_row(vec![
                    endpoint.to_string(),
                    channel_label(channel).to_string(),
                    reply.kind().to_string(),
                    reply.size().to_string(),
                    reply.value().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let value = serde_json::to_string_pretty(&reply.value())
                .unwrap_or_else(|_| "null".to_string());
            println!(
                "endpoint={} channel={} kind={} size={}",
                endpoint,
                channel_label(channel),
                reply.kind(),
                reply.size()
            );
            println!("{value}");
        }
        OutputFormat::Raw => match reply {
            Reply::Encoded(text) => print_raw(text.as_bytes()),
            Reply::Binary(bytes) => print_raw(bytes),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn channel_label(channel: &str) -> &str {
    if channel.is_empty() {
        "<default>"
    } else {
        channel
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
