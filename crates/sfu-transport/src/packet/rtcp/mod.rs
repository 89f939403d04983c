//! RTCP Packet module
//!
//! This module provides the RTCP packets exchanged by the transport as defined
//! in RFC 3550 (SR, RR) and RFC 4585 / RFC 5104 (transport-layer and
//! payload-specific feedback). Other packet types are carried opaquely so a
//! compound packet always round-trips.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::Result;

/// RTCP version (same as RTP, always 2)
pub const RTCP_VERSION: u8 = 2;

/// Size of the common RTCP header
pub const RTCP_HEADER_SIZE: usize = 4;

/// RTCP packet types as defined in RFC 3550, RFC 3611 and RFC 4585
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Sender Report (SR)
    SenderReport = 200,

    /// Receiver Report (RR)
    ReceiverReport = 201,

    /// Source Description (SDES)
    SourceDescription = 202,

    /// Goodbye (BYE)
    Goodbye = 203,

    /// Application-Defined (APP)
    ApplicationDefined = 204,

    /// Transport-layer feedback (RTPFB)
    RtpFeedback = 205,

    /// Payload-specific feedback (PSFB)
    PayloadFeedback = 206,

    /// Extended Reports (XR)
    ExtendedReport = 207,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            204 => Ok(RtcpPacketType::ApplicationDefined),
            205 => Ok(RtcpPacketType::RtpFeedback),
            206 => Ok(RtcpPacketType::PayloadFeedback),
            207 => Ok(RtcpPacketType::ExtendedReport),
            _ => Err(Error::ProtocolParse(format!("Unknown RTCP packet type: {}", value))),
        }
    }
}

mod feedback;
mod ntp;
mod receiver_report;
mod report_block;
mod sender_report;
mod twcc;

pub use feedback::*;
pub use ntp::NtpTimestamp;
pub use receiver_report::RtcpReceiverReport;
pub use report_block::RtcpReportBlock;
pub use sender_report::RtcpSenderReport;
pub use twcc::TransportWideFeedback;

/// Check whether a datagram multiplexed with RTP is RTCP (RFC 5761)
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= RTCP_HEADER_SIZE && (192..=223).contains(&data[1])
}

/// RTCP packet variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// Sender Report (SR)
    SenderReport(RtcpSenderReport),

    /// Receiver Report (RR)
    ReceiverReport(RtcpReceiverReport),

    /// Transport-layer feedback
    RtpFeedback(RtcpRtpFeedback),

    /// Payload-specific feedback
    PayloadFeedback(RtcpPayloadFeedback),

    /// SDES, BYE, APP, XR: body kept as received
    Other {
        packet_type: RtcpPacketType,
        count: u8,
        payload: Bytes,
    },
}

impl RtcpPacket {
    pub fn packet_type(&self) -> RtcpPacketType {
        match self {
            RtcpPacket::SenderReport(_) => RtcpPacketType::SenderReport,
            RtcpPacket::ReceiverReport(_) => RtcpPacketType::ReceiverReport,
            RtcpPacket::RtpFeedback(_) => RtcpPacketType::RtpFeedback,
            RtcpPacket::PayloadFeedback(_) => RtcpPacketType::PayloadFeedback,
            RtcpPacket::Other { packet_type, .. } => *packet_type,
        }
    }

    /// Report count or feedback format for the common header
    fn count(&self) -> u8 {
        match self {
            RtcpPacket::SenderReport(sr) => sr.report_blocks.len() as u8,
            RtcpPacket::ReceiverReport(rr) => rr.report_blocks.len() as u8,
            RtcpPacket::RtpFeedback(fb) => fb.fmt(),
            RtcpPacket::PayloadFeedback(fb) => fb.fmt(),
            RtcpPacket::Other { count, .. } => *count,
        }
    }

    /// Parse one RTCP packet, consuming it from the buffer
    pub fn parse(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < RTCP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTCP_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first_byte = buf.get_u8();
        let version = (first_byte >> 6) & 0x03;
        if version != RTCP_VERSION {
            return Err(Error::ProtocolParse(format!("Invalid RTCP version: {}", version)));
        }
        let padding = (first_byte >> 5) & 0x01 != 0;
        let count = first_byte & 0x1F;
        let packet_type = RtcpPacketType::try_from(buf.get_u8())?;
        let length = buf.get_u16() as usize * 4;

        if buf.remaining() < length {
            return Err(Error::BufferTooSmall {
                required: length,
                available: buf.remaining(),
            });
        }

        let mut body = buf.split_to(length);
        if padding {
            let pad = body.last().copied().unwrap_or(0) as usize;
            if pad == 0 || pad > body.len() {
                return Err(Error::ProtocolParse(format!("Invalid RTCP padding length {}", pad)));
            }
            body.truncate(body.len() - pad);
        }

        let packet = match packet_type {
            RtcpPacketType::SenderReport => RtcpPacket::SenderReport(RtcpSenderReport::parse(&mut body, count)?),
            RtcpPacketType::ReceiverReport => RtcpPacket::ReceiverReport(RtcpReceiverReport::parse(&mut body, count)?),
            RtcpPacketType::RtpFeedback => RtcpPacket::RtpFeedback(RtcpRtpFeedback::parse(count, &mut body)?),
            RtcpPacketType::PayloadFeedback => RtcpPacket::PayloadFeedback(RtcpPayloadFeedback::parse(count, &mut body)?),
            other => RtcpPacket::Other {
                packet_type: other,
                count,
                payload: body,
            },
        };

        Ok(packet)
    }

    /// Serialize this packet, including its common header
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();
        buf.put_u8(RTCP_VERSION << 6 | (self.count() & 0x1F));
        buf.put_u8(self.packet_type() as u8);
        buf.put_u16(0);

        match self {
            RtcpPacket::SenderReport(sr) => sr.serialize(buf),
            RtcpPacket::ReceiverReport(rr) => rr.serialize(buf),
            RtcpPacket::RtpFeedback(fb) => fb.serialize(buf)?,
            RtcpPacket::PayloadFeedback(fb) => fb.serialize(buf)?,
            RtcpPacket::Other { payload, .. } => {
                buf.put_slice(payload);
                while (buf.len() - start) % 4 != 0 {
                    buf.put_u8(0);
                }
            }
        }

        let words = (buf.len() - start) / 4 - 1;
        if words > u16::MAX as usize {
            return Err(Error::ProtocolParse(format!("RTCP packet of {} words", words)));
        }
        buf[start + 2..start + 4].copy_from_slice(&(words as u16).to_be_bytes());
        Ok(())
    }
}

/// A compound RTCP packet: one or more RTCP packets in a single datagram
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpCompoundPacket {
    pub packets: Vec<RtcpPacket>,
}

impl RtcpCompoundPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: RtcpPacket) {
        self.packets.push(packet);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Parse every packet of a compound datagram
    ///
    /// A malformed sub-packet fails the whole compound since the remaining
    /// packet boundaries cannot be trusted.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let mut compound = Self::new();
        while buf.has_remaining() {
            compound.push(RtcpPacket::parse(&mut buf)?);
        }
        if compound.is_empty() {
            return Err(Error::ProtocolParse("Empty RTCP compound packet".to_string()));
        }
        Ok(compound)
    }

    /// Serialize into one buffer bounded by `max_size`
    pub fn serialize(&self, max_size: usize) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(max_size);
        for packet in &self.packets {
            packet.serialize(&mut buf)?;
        }
        if buf.len() > max_size {
            return Err(Error::ProtocolParse(format!(
                "RTCP compound of {} bytes exceeds {} bytes",
                buf.len(),
                max_size
            )));
        }
        Ok(buf)
    }
}
