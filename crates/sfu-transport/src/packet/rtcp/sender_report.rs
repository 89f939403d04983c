use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc, RtpTimestamp};
use super::ntp::NtpTimestamp;
use super::report_block::RtcpReportBlock;

/// RTCP Sender Report (SR) packet
/// Defined in RFC 3550 Section 6.4.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    /// SSRC of the sender
    pub ssrc: RtpSsrc,

    /// Wall clock time the report was sent
    pub ntp_timestamp: NtpTimestamp,

    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: RtpTimestamp,

    /// Packets sent since the source started
    pub sender_packet_count: u32,

    /// Payload octets sent since the source started
    pub sender_octet_count: u32,

    /// Report blocks
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpSenderReport {
    /// Size of the sender info section following the SSRC
    const SENDER_INFO_SIZE: usize = 20;

    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            ntp_timestamp: NtpTimestamp::default(),
            rtp_timestamp: 0,
            sender_packet_count: 0,
            sender_octet_count: 0,
            report_blocks: Vec::new(),
        }
    }

    pub fn add_report_block(&mut self, block: RtcpReportBlock) {
        self.report_blocks.push(block);
    }

    /// Body size in bytes (without the common header)
    pub fn size(&self) -> usize {
        4 + Self::SENDER_INFO_SIZE + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    /// Parse the body of a sender report
    pub fn parse(buf: &mut impl Buf, report_count: u8) -> Result<Self> {
        let required = 4 + Self::SENDER_INFO_SIZE;
        if buf.remaining() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let ntp_timestamp = NtpTimestamp::from_u64(buf.get_u64());
        let rtp_timestamp = buf.get_u32();
        let sender_packet_count = buf.get_u32();
        let sender_octet_count = buf.get_u32();

        let mut report_blocks = Vec::with_capacity(report_count as usize);
        for _ in 0..report_count {
            report_blocks.push(RtcpReportBlock::parse(buf)?);
        }

        Ok(Self {
            ssrc,
            ntp_timestamp,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            report_blocks,
        })
    }

    /// Serialize the body of a sender report
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_timestamp.to_u64());
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.sender_packet_count);
        buf.put_u32(self.sender_octet_count);
        for block in &self.report_blocks {
            block.serialize(buf);
        }
    }
}
