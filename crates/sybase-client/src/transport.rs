//! Packet framing and message reassembly over an async transport.
//!
//! A TDS message is a run of packets whose last one carries the LAST
//! status flag. [`Transport`] frames outgoing requests into packets of
//! the negotiated size and reassembles incoming packets into one
//! contiguous payload for the token parser.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds5_protocol::packet::{
    MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::Error;

/// A TDS packet with header and payload.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (excluding header).
    pub payload: BytesMut,
}

/// Codec turning a byte stream into TDS packets and back.
#[derive(Debug)]
pub(crate) struct PacketCodec {
    /// Largest packet accepted from the peer.
    max_packet_size: usize,
    /// Sequence number for outgoing packets.
    packet_number: u8,
}

impl PacketCodec {
    pub(crate) fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            packet_number: 0,
        }
    }

    fn next_packet_number(&mut self) -> u8 {
        self.packet_number = self.packet_number.wrapping_add(1);
        self.packet_number
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least a header to know the packet length.
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < PACKET_HEADER_SIZE || length > self.max_packet_size {
            return Err(Error::Codec(
                tds5_protocol::ProtocolError::InvalidPacketLength(length),
            ));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let packet_bytes = src.split_to(length);
        let mut cursor = packet_bytes.as_ref();
        let header = PacketHeader::decode(&mut cursor)?;
        let payload = BytesMut::from(&packet_bytes[PACKET_HEADER_SIZE..]);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            is_last = header.is_last(),
            "decoded packet"
        );

        Ok(Some(Packet { header, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = PACKET_HEADER_SIZE + item.payload.len();
        if total_length > self.max_packet_size {
            return Err(Error::Codec(
                tds5_protocol::ProtocolError::InvalidPacketLength(total_length),
            ));
        }

        let mut header = item.header;
        header.length = total_length as u16;
        header.packet_number = self.next_packet_number();

        dst.reserve(total_length);
        header.encode(dst);
        dst.extend_from_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_number = header.packet_number,
            "encoded packet"
        );

        Ok(())
    }
}

/// Framed packet transport with message-level send and receive.
pub(crate) struct Transport<T> {
    framed: Framed<T, PacketCodec>,
}

impl<T> Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: T) -> Self {
        Self {
            framed: Framed::new(io, PacketCodec::new()),
        }
    }

    /// Send a complete message, fragmenting the body into packets of
    /// the given size. All packets are queued and flushed in one write.
    pub(crate) async fn send_message(
        &mut self,
        packet_type: PacketType,
        body: Bytes,
        packet_size: usize,
    ) -> Result<(), Error> {
        let max_payload = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
        let mut chunks: Vec<&[u8]> = body.chunks(max_payload).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let status = if index == last {
                PacketStatus::LAST
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            let packet = Packet {
                header,
                payload: BytesMut::from(chunk),
            };
            self.framed.feed(packet).await?;
        }
        self.framed.flush().await?;

        tracing::trace!(?packet_type, body_len = body.len(), "sent message");
        Ok(())
    }

    /// Read packets until one carries the LAST flag, concatenating
    /// their payloads. The timeout applies to each receive, not to the
    /// whole message.
    pub(crate) async fn read_message(&mut self, per_read_timeout: Duration) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        loop {
            let next = tokio::time::timeout(per_read_timeout, self.framed.next())
                .await
                .map_err(|_| Error::CommandTimeout)?;
            let packet = match next {
                Some(packet) => packet?,
                None => return Err(Error::ConnectionClosed),
            };
            payload.extend_from_slice(&packet.payload);
            if packet.header.is_last() {
                tracing::trace!(payload_len = payload.len(), "reassembled message");
                return Ok(payload.freeze());
            }
        }
    }
}

impl<T> std::fmt::Debug for Transport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
