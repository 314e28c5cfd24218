//! Mutable RTP packet view used on the forwarding path.

use bytes::BytesMut;
use rtp::header::Header;
use util::marshal::MarshalSize;

/// An RTP packet owned by the receiving transport and borrowed by the forwarding path.
///
/// The header is the parsed representation from the `rtp` crate; the payload is kept mutable so
/// codec payload rewriting can happen in place. Components that rewrite header fields or payload
/// bytes must restore them before returning control, so the same packet can be handed to other
/// consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP header.
    pub header: Header,
    /// RTP payload, without padding.
    pub payload: BytesMut,
}

impl RtpPacket {
    /// Create a packet from a parsed header and payload bytes.
    #[must_use]
    pub fn new(header: Header, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// SSRC of the packet.
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.header.ssrc = ssrc;
    }

    /// RTP sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.header.sequence_number = sequence_number;
    }

    /// RTP timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.header.timestamp = timestamp;
    }

    /// RTP payload type.
    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.header.payload_type = payload_type;
    }

    /// Marker bit.
    #[must_use]
    pub fn marker(&self) -> bool {
        self.header.marker
    }

    /// Total wire size of the packet (header plus payload).
    #[must_use]
    pub fn size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }
}

impl From<rtp::packet::Packet> for RtpPacket {
    fn from(packet: rtp::packet::Packet) -> Self {
        Self {
            header: packet.header,
            payload: BytesMut::from(&packet.payload[..]),
        }
    }
}

impl From<RtpPacket> for rtp::packet::Packet {
    fn from(packet: RtpPacket) -> Self {
        Self {
            header: packet.header,
            payload: packet.payload.freeze(),
        }
    }
}
