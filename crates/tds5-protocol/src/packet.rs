//! TDS 5.0 packet header definitions.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Smallest packet size a server will accept.
pub const MIN_PACKET_SIZE: usize = 512;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default TDS 5.0 packet size before negotiation.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Pre-TDS7 login record.
    Login = 0x02,
    /// Tabular response from the server.
    Response = 0x04,
    /// Normal request carrying a token stream (language, dynamic, ...).
    Query = 0x0F,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x02 => Ok(Self::Login),
            0x04 => Ok(Self::Response),
            0x0F => Ok(Self::Query),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// Last packet of the logical message.
        const LAST = 0x01;
    }
}

/// TDS packet header.
///
/// Every TDS packet begins with an 8-byte header describing the packet
/// type, status, and total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header, big-endian on the wire.
    pub length: u16,
    /// Channel number (unused, 0).
    pub channel: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_number: u8,
    /// Window (unused, 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            channel: 0,
            packet_number: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof);
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_truncate(src.get_u8());
        let length = src.get_u16();
        let channel = src.get_u16();
        let packet_number = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            channel,
            packet_number,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.channel);
        dst.put_u8(self.packet_number);
        dst.put_u8(self.window);
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.status.contains(PacketStatus::LAST)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::Query,
            status: PacketStatus::LAST,
            length: 100,
            channel: 0,
            packet_number: 1,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let mut cursor = &buf[..];
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn payload_length_excludes_header() {
        let header = PacketHeader::new(PacketType::Response, PacketStatus::LAST, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0x02).unwrap(), PacketType::Login);
        assert_eq!(PacketType::from_u8(0x0F).unwrap(), PacketType::Query);
        assert!(PacketType::from_u8(0xFF).is_err());
    }
}
