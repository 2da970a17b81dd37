use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::packet::{Packet, PacketFlags};

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum header block size: 8 KiB.
pub const DEFAULT_MAX_HEADER: usize = 8 * 1024;

const METHOD: &str = "Method";
const CHANNEL_ID: &str = "Channel-Id";
const MESSAGE_ID: &str = "Message-Id";
const FLAGS: &str = "Flags";
const TYPE: &str = "Type";
const CONTENT_LENGTH: &str = "Content-Length";

const TYPE_NORMAL: &str = "NORMAL";
const TYPE_BINARY: &str = "BINARY";

/// Limits applied by the packet codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Maximum size of the header block, including the blank line. Default: 8 KiB.
    pub max_header_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_header_size: DEFAULT_MAX_HEADER,
        }
    }
}

/// Encode a packet into the header-style wire format.
///
/// Wire format:
/// ```text
/// Method: <endpoint>\r\n
/// Channel-Id: <channel id>\r\n
/// Message-Id: <message id>\r\n
/// Flags: <decimal flag byte>\r\n
/// Type: NORMAL | BINARY\r\n
/// Content-Length: <payload length>\r\n
/// \r\n
/// <payload>
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut, config: &FrameConfig) -> Result<()> {
    packet.flags.validate()?;
    if packet.payload.len() > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: packet.payload.len(),
            max: config.max_payload_size,
        });
    }
    for (name, value) in [
        (METHOD, &packet.endpoint),
        (CHANNEL_ID, &packet.channel_id),
        (MESSAGE_ID, &packet.message_id),
    ] {
        if value.contains(['\r', '\n']) {
            return Err(FrameError::InvalidHeader(format!(
                "{name} must not contain line breaks"
            )));
        }
        // Decoding trims values, so padded ones would not survive the trip.
        if value.trim() != value.as_str() {
            return Err(FrameError::InvalidHeader(format!(
                "{name} must not start or end with whitespace"
            )));
        }
    }

    let kind = if packet.flags.is_binary_chunk() {
        TYPE_BINARY
    } else {
        TYPE_NORMAL
    };
    let header = format!(
        "{METHOD}: {}\r\n{CHANNEL_ID}: {}\r\n{MESSAGE_ID}: {}\r\n{FLAGS}: {}\r\n{TYPE}: {kind}\r\n{CONTENT_LENGTH}: {}\r\n\r\n",
        packet.endpoint,
        packet.channel_id,
        packet.message_id,
        packet.flags.bits(),
        packet.payload.len(),
    );
    if header.len() > config.max_header_size {
        return Err(FrameError::HeaderTooLarge {
            size: header.len(),
            max: config.max_header_size,
        });
    }

    dst.reserve(header.len() + packet.payload.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(&packet.payload);
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer. Header keys are
/// matched case-insensitively, unknown keys are ignored, and bare `\n` line
/// endings are accepted.
pub fn decode_packet(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Packet>> {
    let Some((header_len, body_start)) = find_header_end(src) else {
        if src.len() > config.max_header_size {
            return Err(FrameError::HeaderTooLarge {
                size: src.len(),
                max: config.max_header_size,
            });
        }
        return Ok(None);
    };
    if body_start > config.max_header_size {
        return Err(FrameError::HeaderTooLarge {
            size: body_start,
            max: config.max_header_size,
        });
    }

    let header = std::str::from_utf8(&src[..header_len])
        .map_err(|err| FrameError::InvalidHeader(format!("header is not UTF-8: {err}")))?;
    let fields = HeaderFields::parse(header)?;

    if fields.content_length > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: fields.content_length,
            max: config.max_payload_size,
        });
    }
    if src.len() < body_start + fields.content_length {
        return Ok(None);
    }

    let HeaderFields {
        endpoint,
        channel_id,
        message_id,
        flags,
        content_length,
    } = fields;
    src.advance(body_start);
    let payload = src.split_to(content_length).freeze();

    Ok(Some(Packet {
        channel_id,
        message_id,
        endpoint,
        flags,
        payload,
    }))
}

/// Locate the blank line ending the header block.
///
/// Returns the length of the header lines and the offset of the first payload byte.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (idx, byte) in buf.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..idx];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, idx + 1));
        }
        line_start = idx + 1;
    }
    None
}

struct HeaderFields {
    endpoint: String,
    channel_id: String,
    message_id: String,
    flags: PacketFlags,
    content_length: usize,
}

impl HeaderFields {
    fn parse(header: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut channel_id = None;
        let mut message_id = None;
        let mut flags = None;
        let mut kind = None;
        let mut content_length = None;

        for line in header.lines() {
            let Some((key, value)) = line.split_once(':') else {
                return Err(FrameError::InvalidHeader(format!(
                    "expected 'Key: value', got '{line}'"
                )));
            };
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case(METHOD) {
                endpoint = Some(value.to_string());
            } else if key.eq_ignore_ascii_case(CHANNEL_ID) {
                channel_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case(MESSAGE_ID) {
                message_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case(FLAGS) {
                let bits = value.parse::<u8>().map_err(|_| {
                    FrameError::InvalidHeader(format!("flags are not a byte value: '{value}'"))
                })?;
                flags = Some(PacketFlags::from_bits(bits)?);
            } else if key.eq_ignore_ascii_case(TYPE) {
                kind = Some(parse_type(value)?);
            } else if key.eq_ignore_ascii_case(CONTENT_LENGTH) {
                content_length = Some(value.parse::<usize>().map_err(|_| {
                    FrameError::InvalidHeader(format!("content length is not a number: '{value}'"))
                })?);
            }
        }

        let binary = kind.ok_or(FrameError::MissingHeader(TYPE))?;
        let flags = match flags {
            Some(flags) if flags.is_binary_chunk() != binary => {
                return Err(FrameError::InvalidHeader(format!(
                    "type {} disagrees with flags {flags:?}",
                    if binary { TYPE_BINARY } else { TYPE_NORMAL }
                )));
            }
            Some(flags) => flags,
            None if binary => PacketFlags::BINARY_CHUNK,
            None => PacketFlags::NONE,
        };

        Ok(Self {
            endpoint: endpoint.ok_or(FrameError::MissingHeader(METHOD))?,
            channel_id: channel_id.ok_or(FrameError::MissingHeader(CHANNEL_ID))?,
            message_id: message_id.ok_or(FrameError::MissingHeader(MESSAGE_ID))?,
            flags,
            content_length: content_length.ok_or(FrameError::MissingHeader(CONTENT_LENGTH))?,
        })
    }
}

/// `true` for `BINARY`, `false` for `NORMAL`.
fn parse_type(value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case(TYPE_BINARY) {
        Ok(true)
    } else if value.eq_ignore_ascii_case(TYPE_NORMAL) {
        Ok(false)
    } else {
        Err(FrameError::InvalidHeader(format!(
            "unknown packet type '{value}'"
        )))
    }
}

/// `tokio_util` codec for [`Packet`]s over a byte stream.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    config: FrameConfig,
}

impl PacketCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        decode_packet(src, &self.config)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        encode_packet(&packet, dst, &self.config)
    }
}
