use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// Report block in RTCP SR/RR packets
/// Defined in RFC 3550 Section 6.4.1 and 6.4.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReportBlock {
    /// SSRC identifier of the source this report is for
    pub ssrc: RtpSsrc,

    /// Fraction of packets lost since last report (8-bit fixed point)
    pub fraction_lost: u8,

    /// Cumulative number of packets lost (24 bits)
    pub cumulative_lost: u32,

    /// Extended highest sequence number received
    pub highest_seq: u32,

    /// Interarrival jitter estimate
    pub jitter: u32,

    /// Middle 32 bits of the last SR timestamp from this source
    pub last_sr: u32,

    /// Delay since last SR from this source (in units of 1/65536 seconds)
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    /// Size of a report block in bytes
    pub const SIZE: usize = 24;

    /// Create a new empty report block
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            fraction_lost: 0,
            cumulative_lost: 0,
            highest_seq: 0,
            jitter: 0,
            last_sr: 0,
            delay_since_last_sr: 0,
        }
    }

    /// Parse a report block from bytes
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let lost = buf.get_u32();

        Ok(Self {
            ssrc,
            fraction_lost: (lost >> 24) as u8,
            cumulative_lost: lost & 0x00FF_FFFF,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    /// Serialize a report block to bytes
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32((self.fraction_lost as u32) << 24 | (self.cumulative_lost & 0x00FF_FFFF));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }

    /// Fraction lost in the RFC 3550 8-bit fixed point form
    pub fn fraction(expected: u32, lost: u32) -> u8 {
        if expected == 0 || lost == 0 {
            return 0;
        }
        (((lost as u64) << 8) / expected as u64).min(255) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_block_wire_layout() {
        let block = RtcpReportBlock {
            ssrc: 0x12345678,
            fraction_lost: 42,
            cumulative_lost: 0x0001_0203,
            highest_seq: 5000,
            jitter: 100,
            last_sr: 0x87654321,
            delay_since_last_sr: 1500,
        };

        let mut buf = BytesMut::new();
        block.serialize(&mut buf);
        assert_eq!(buf.len(), RtcpReportBlock::SIZE);
        assert_eq!(&buf[4..8], &[42, 0x01, 0x02, 0x03]);

        let parsed = RtcpReportBlock::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn test_short_block_fails() {
        let mut data = bytes::Bytes::from_static(&[0u8; 20]);
        assert!(RtcpReportBlock::parse(&mut data).is_err());
    }

    #[test]
    fn test_fraction() {
        assert_eq!(RtcpReportBlock::fraction(0, 0), 0);
        assert_eq!(RtcpReportBlock::fraction(1000, 0), 0);
        assert_eq!(RtcpReportBlock::fraction(1000, 250), 64);
        assert_eq!(RtcpReportBlock::fraction(4, 4), 255);
    }
}
