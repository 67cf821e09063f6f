//! Datagram envelope.
//!
//! Every datagram starts with a fixed 19-byte little-endian header; whatever
//! follows is a message payload owned by [`crate::messages`]. The layout is
//! normative, so the codec is written field by field rather than derived.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Current protocol version. Datagrams carrying any other value are dropped
/// silently on receive.
pub const PROTOCOL_VERSION: u32 = 0x0000_0004;

/// Encoded header size in bytes. No padding anywhere in the layout.
pub const HEADER_LEN: usize = 19;

bitflags::bitflags! {
    /// Header flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        /// Sender retransmits until acked.
        const RELIABLE = 0x01;
        /// Pure ack carrier; payload length must be zero.
        const ACK_ONLY = 0x02;
        /// Keep-alive, otherwise empty.
        const HEARTBEAT = 0x04;
        /// Peer voluntarily closing.
        const DISCONNECT = 0x08;
        /// Reserved for future fragmentation.
        const FRAGMENT_START = 0x10;
        /// Reserved for future fragmentation.
        const FRAGMENT_END = 0x20;
    }
}

/// Fixed header at offset 0 of every datagram.
///
/// | offset | size | field            |
/// |--------|------|------------------|
/// | 0      | 4    | protocol version |
/// | 4      | 1    | flags            |
/// | 5      | 4    | sequence         |
/// | 9      | 4    | ack              |
/// | 13     | 4    | ack bitfield     |
/// | 17     | 2    | message type     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u32,
    pub flags: PacketFlags,
    /// Sequence number; 0 for unreliable packets.
    pub sequence: u32,
    /// Highest sequence received from the remote.
    pub ack: u32,
    /// Bit i set ⇔ `ack - (i + 1)` was received.
    pub ack_bitfield: u32,
    /// Discriminator shared with the payload union tag.
    pub message_type: u16,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, sequence: u32, ack: u32, ack_bitfield: u32, message_type: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            sequence,
            ack,
            ack_bitfield,
            message_type,
        }
    }

    /// Appends the 19-byte encoding to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.version);
        buf.put_u8(self.flags.bits());
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.ack);
        buf.put_u32_le(self.ack_bitfield);
        buf.put_u16_le(self.message_type);
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        self.encode(&mut out);
        out
    }

    /// Parses the header off the front of a datagram. Unknown flag bits are
    /// dropped rather than rejected.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        if datagram.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                len: datagram.len(),
            });
        }
        let mut buf = datagram;
        let version = buf.get_u32_le();
        if version != PROTOCOL_VERSION {
            return Err(WireError::VersionMismatch { version });
        }
        let flags = PacketFlags::from_bits_truncate(buf.get_u8());
        let sequence = buf.get_u32_le();
        let ack = buf.get_u32_le();
        let ack_bitfield = buf.get_u32_le();
        let message_type = buf.get_u16_le();
        Ok(Self {
            version,
            flags,
            sequence,
            ack,
            ack_bitfield,
            message_type,
        })
    }
}

/// Decode failures. All of them end in a silent discard at the receive path;
/// nothing here propagates to callers as a hard error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short for header: {len} bytes")]
    Truncated { len: usize },
    #[error("protocol version mismatch: 0x{version:08x}")]
    VersionMismatch { version: u32 },
    #[error("payload rejected by schema: {0}")]
    BadPayload(String),
    #[error("header type {header} does not match payload tag {payload}")]
    TagMismatch { header: u16, payload: u16 },
    #[error("unknown message type {0}")]
    UnknownType(u16),
}
