//! Packet envelope and flag bits.
//!
//! Flag bits:
//! - bit 0: request (cleared on responses)
//! - bit 1: binary chunk (payload is raw bytes of a streamed transfer)
//! - bit 2: starts binary (payload is the id of a transfer that follows)
//! - bit 3: error (payload is an encoded failure instead of a value)

use std::fmt;
use std::ops::BitOr;

use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Bit-packed packet flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: Self = Self(0);
    pub const REQUEST: Self = Self(1 << 0);
    pub const BINARY_CHUNK: Self = Self(1 << 1);
    pub const STARTS_BINARY: Self = Self(1 << 2);
    pub const ERROR: Self = Self(1 << 3);

    const KNOWN_BITS: u8 = 0b1111;

    /// Parse a flag byte, rejecting unknown bits and chunk+start combinations.
    pub fn from_bits(bits: u8) -> Result<Self> {
        let flags = Self(bits);
        if bits & !Self::KNOWN_BITS != 0 {
            return Err(FrameError::InvalidFlags(bits));
        }
        flags.validate()?;
        Ok(flags)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_request(self) -> bool {
        self.contains(Self::REQUEST)
    }

    pub const fn is_binary_chunk(self) -> bool {
        self.contains(Self::BINARY_CHUNK)
    }

    pub const fn starts_binary(self) -> bool {
        self.contains(Self::STARTS_BINARY)
    }

    pub const fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    /// A packet is either a chunk or the start of a transfer, never both.
    pub fn validate(self) -> Result<()> {
        if self.is_binary_chunk() && self.starts_binary() {
            return Err(FrameError::InvalidFlags(self.0));
        }
        Ok(())
    }
}

impl BitOr for PacketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::REQUEST, "REQUEST"),
            (Self::BINARY_CHUNK, "BINARY_CHUNK"),
            (Self::STARTS_BINARY, "STARTS_BINARY"),
            (Self::ERROR, "ERROR"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// One multiplexed message on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Registered service the packet targets; empty for the default service.
    /// For binary chunks this is the transfer id.
    pub channel_id: String,
    /// Correlation id; for binary chunks the decimal sequence number.
    pub message_id: String,
    /// Endpoint name; empty for binary chunks.
    pub endpoint: String,
    pub flags: PacketFlags,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        endpoint: impl Into<String>,
        flags: PacketFlags,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            endpoint: endpoint.into(),
            flags,
            payload: payload.into(),
        }
    }

    /// A chunk of the binary transfer `transfer_id` with sequence number `sequence`.
    ///
    /// An empty `data` terminates the transfer.
    pub fn chunk(transfer_id: impl Into<String>, sequence: u64, data: impl Into<Bytes>) -> Self {
        Self::new(
            transfer_id,
            sequence.to_string(),
            String::new(),
            PacketFlags::BINARY_CHUNK,
            data,
        )
    }

    /// Sequence number of a binary chunk.
    pub fn sequence(&self) -> Result<u64> {
        self.message_id.parse().map_err(|_| {
            FrameError::InvalidHeader(format!(
                "chunk sequence number is not numeric: '{}'",
                self.message_id
            ))
        })
    }

    /// Payload interpreted as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|err| FrameError::InvalidHeader(format!("payload is not UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_wire_layout() {
        assert_eq!(PacketFlags::REQUEST.bits(), 0b001);
        assert_eq!(PacketFlags::BINARY_CHUNK.bits(), 0b010);
        assert_eq!(PacketFlags::STARTS_BINARY.bits(), 0b100);
        assert_eq!(PacketFlags::ERROR.bits(), 0b1000);
    }

    #[test]
    fn request_combines_with_either_binary_flag() {
        let start = PacketFlags::REQUEST | PacketFlags::STARTS_BINARY;
        assert!(start.is_request());
        assert!(start.starts_binary());
        assert!(start.validate().is_ok());

        let chunk = PacketFlags::REQUEST | PacketFlags::BINARY_CHUNK;
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn chunk_and_start_together_rejected() {
        let bits = (PacketFlags::BINARY_CHUNK | PacketFlags::STARTS_BINARY).bits();
        assert!(matches!(
            PacketFlags::from_bits(bits),
            Err(FrameError::InvalidFlags(_))
        ));
    }

    #[test]
    fn unknown_bits_rejected() {
        assert!(matches!(
            PacketFlags::from_bits(0b1_0000),
            Err(FrameError::InvalidFlags(0b1_0000))
        ));
    }

    #[test]
    fn without_clears_only_given_bits() {
        let flags = PacketFlags::REQUEST | PacketFlags::STARTS_BINARY;
        assert_eq!(flags.without(PacketFlags::REQUEST), PacketFlags::STARTS_BINARY);
    }

    #[test]
    fn debug_lists_flag_names() {
        let flags = PacketFlags::REQUEST | PacketFlags::ERROR;
        assert_eq!(format!("{flags:?}"), "{REQUEST, ERROR}");
        assert_eq!(format!("{:?}", PacketFlags::NONE), "{}");
    }

    #[test]
    fn chunk_packet_carries_sequence() {
        let packet = Packet::chunk("transfer-1", 42, Bytes::from_static(b"abc"));
        assert_eq!(packet.channel_id, "transfer-1");
        assert!(packet.flags.is_binary_chunk());
        assert!(packet.endpoint.is_empty());
        assert_eq!(packet.sequence().unwrap(), 42);
    }

    #[test]
    fn non_numeric_sequence_is_an_error() {
        let packet = Packet::new("t", "seven", "", PacketFlags::BINARY_CHUNK, Bytes::new());
        assert!(matches!(packet.sequence(), Err(FrameError::InvalidHeader(_))));
    }
}
