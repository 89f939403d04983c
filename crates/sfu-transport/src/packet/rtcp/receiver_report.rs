use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};
use super::report_block::RtcpReportBlock;

/// RTCP Receiver Report (RR) packet
/// Defined in RFC 3550 Section 6.4.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// SSRC of the receiver
    pub ssrc: RtpSsrc,

    /// Report blocks
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// Create a new receiver report
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            report_blocks: Vec::new(),
        }
    }

    /// Add a report block
    pub fn add_report_block(&mut self, block: RtcpReportBlock) {
        self.report_blocks.push(block);
    }

    /// Body size in bytes (without the common header)
    pub fn size(&self) -> usize {
        4 + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    /// Parse the body of a receiver report
    pub fn parse(buf: &mut impl Buf, report_count: u8) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let mut report_blocks = Vec::with_capacity(report_count as usize);
        for _ in 0..report_count {
            report_blocks.push(RtcpReportBlock::parse(buf)?);
        }

        Ok(Self { ssrc, report_blocks })
    }

    /// Serialize the body of a receiver report
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        for block in &self.report_blocks {
            block.serialize(buf);
        }
    }
}
