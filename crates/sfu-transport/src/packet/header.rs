use bytes::{Buf, BufMut, BytesMut};
use bitvec::prelude::*;

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version (always 2 in practice)
pub const RTP_VERSION: u8 = 2;

/// Padding flag position in the first byte
pub const RTP_PADDING_FLAG: usize = 2;

/// Extension flag position in the first byte
pub const RTP_EXTENSION_FLAG: usize = 3;

/// CSRC count position in the first byte (4 bits)
pub const RTP_CC_OFFSET: usize = 4;

/// Marker bit position in the second byte
pub const RTP_MARKER_FLAG: usize = 0;

/// Payload type position in the second byte (7 bits)
pub const RTP_PT_OFFSET: usize = 1;

/// Largest CSRC list the 4-bit CC field can describe
pub const RTP_MAX_CSRC_COUNT: usize = 15;

/// Minimum header size (without CSRC or extensions)
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// Fixed RTP header according to RFC 3550
///
/// The header extension block is not part of this struct; it is parsed
/// against the negotiated extension map by
/// [`RtpHeaderExtension`](super::RtpHeaderExtension).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (should be 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// CSRC count (number of contributing sources)
    pub cc: u8,

    /// Marker bit
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Timestamp
    pub timestamp: RtpTimestamp,

    /// Synchronization source identifier
    pub ssrc: RtpSsrc,

    /// Contributing source identifiers
    pub csrc: Vec<RtpCsrc>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl RtpHeader {
    /// Create a new RTP header with default values
    pub fn new(payload_type: u8, sequence_number: RtpSequenceNumber,
               timestamp: RtpTimestamp, ssrc: RtpSsrc) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Size of the fixed header plus CSRC list in bytes
    pub fn size(&self) -> usize {
        RTP_MIN_HEADER_SIZE + self.csrc.len() * 4
    }

    /// Parse the fixed header and CSRC list
    ///
    /// On success the buffer is positioned at the extension block (if the
    /// extension flag is set) or at the payload.
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        // First byte: version (2 bits), padding (1 bit), extension (1 bit), CSRC count (4 bits)
        let first_byte = buf.get_u8();
        let bits = first_byte.view_bits::<Msb0>();

        let version = bits[0..2].load_be::<u8>();
        if version != RTP_VERSION {
            return Err(Error::ProtocolParse(format!("Invalid RTP version: {}", version)));
        }

        let padding = bits[RTP_PADDING_FLAG];
        let extension = bits[RTP_EXTENSION_FLAG];
        let cc = bits[RTP_CC_OFFSET..RTP_CC_OFFSET + 4].load_be::<u8>();

        // Second byte: marker (1 bit), payload type (7 bits)
        let second_byte = buf.get_u8();
        let bits = second_byte.view_bits::<Msb0>();

        let marker = bits[RTP_MARKER_FLAG];
        let payload_type = bits[RTP_PT_OFFSET..RTP_PT_OFFSET + 7].load_be::<u8>();

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = cc as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(Error::BufferTooSmall {
                required: csrc_len,
                available: buf.remaining(),
            });
        }

        let mut csrc = Vec::with_capacity(cc as usize);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        Ok(Self {
            version,
            padding,
            extension,
            cc,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
        })
    }

    /// Serialize the fixed header and CSRC list
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.csrc.len() > RTP_MAX_CSRC_COUNT {
            return Err(Error::ProtocolParse(format!(
                "{} CSRCs exceed the limit of {}",
                self.csrc.len(),
                RTP_MAX_CSRC_COUNT
            )));
        }
        if self.cc as usize != self.csrc.len() {
            return Err(Error::ProtocolParse(format!(
                "CSRC count ({}) does not match CSRC list length ({})",
                self.cc, self.csrc.len()
            )));
        }

        buf.reserve(self.size());

        let mut first_byte = 0u8;
        first_byte |= (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 1 << 5;
        }
        if self.extension {
            first_byte |= 1 << 4;
        }
        first_byte |= self.cc & 0x0F;
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 1 << 7;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_header_serialize_parse() {
        let mut header = RtpHeader::new(96, 1000, 0x12345678, 0xabcdef01);
        header.marker = true;
        header.csrc = vec![0x11111111, 0x22222222];
        header.cc = 2;

        let mut buf = BytesMut::new();
        header.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 0x80 | 96);

        let parsed = RtpHeader::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_too_many_csrcs() {
        let mut header = RtpHeader::new(96, 1, 0, 1);
        header.csrc = (0..16).collect();
        header.cc = 16;
        let mut buf = BytesMut::new();
        assert!(matches!(header.serialize(&mut buf), Err(Error::ProtocolParse(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_real_world_header() {
        // V=2, X=1, CC=0, PT=111, seq 0xfd70
        let data = [
            0x90, 0x6f, 0xfd, 0x70, 0x00, 0x00, 0x00, 0x10,
            0xde, 0xad, 0xbe, 0xef,
        ];
        let header = RtpHeader::parse(&mut Bytes::copy_from_slice(&data)).unwrap();

        assert_eq!(header.version, 2);
        assert!(header.extension);
        assert!(!header.padding);
        assert!(!header.marker);
        assert_eq!(header.payload_type, 111);
        assert_eq!(header.sequence_number, 0xfd70);
        assert_eq!(header.timestamp, 16);
        assert_eq!(header.ssrc, 0xdeadbeef);
    }

    #[test]
    fn test_parse_rejects_bad_version_and_short_input() {
        let short = [0x80, 0x60, 0x00];
        assert!(matches!(
            RtpHeader::parse(&mut Bytes::copy_from_slice(&short)),
            Err(Error::BufferTooSmall { .. })
        ));

        let mut v1 = [0u8; 12];
        v1[0] = 0x40;
        assert!(matches!(
            RtpHeader::parse(&mut Bytes::copy_from_slice(&v1)),
            Err(Error::ProtocolParse(_))
        ));

        // CC=3 but no CSRC bytes
        let mut truncated = [0u8; 12];
        truncated[0] = 0x83;
        assert!(RtpHeader::parse(&mut Bytes::copy_from_slice(&truncated)).is_err());
    }

    #[test]
    fn test_serialize_rejects_mismatched_csrc_count() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.cc = 1;
        let mut buf = BytesMut::new();
        assert!(header.serialize(&mut buf).is_err());
    }
}
