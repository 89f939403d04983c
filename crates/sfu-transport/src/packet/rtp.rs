use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::config::{Codec, MediaType};
use crate::error::Error;
use crate::Result;
use super::extension::{ExtensionMap, RtpHeaderExtension};
use super::header::{RtpHeader, RTP_MAX_CSRC_COUNT};

/// Wire pieces of a parsed RTP datagram
#[derive(Debug, Clone)]
pub struct ParsedRtp {
    pub header: RtpHeader,
    pub extension: RtpHeaderExtension,
    pub payload: Bytes,
}

/// Parse an RTP datagram into header, extension and payload
///
/// Padding is stripped from the payload.
pub fn parse_rtp(data: &[u8], extensions: &ExtensionMap) -> Result<ParsedRtp> {
    let mut buf = Bytes::copy_from_slice(data);

    let header = RtpHeader::parse(&mut buf)?;
    let extension = if header.extension {
        RtpHeaderExtension::parse(extensions, &mut buf)?
    } else {
        RtpHeaderExtension::default()
    };

    let padding = if header.padding {
        let padding = buf.as_ref().last().copied().unwrap_or(0) as usize;
        if padding == 0 || padding > buf.remaining() {
            return Err(Error::ProtocolParse(format!(
                "Invalid padding value: {} with {} bytes remaining",
                padding, buf.remaining()
            )));
        }
        padding
    } else {
        0
    };

    let payload = buf.slice(0..buf.len() - padding);
    Ok(ParsedRtp { header, extension, payload })
}

/// RTP packet as it moves through the transport
///
/// Carries the parsed header and extension along with the routing facts the
/// pipeline resolved for it: media type, codec, and the sequence cycle that
/// places it on its source's extended sequence line.
#[derive(Clone)]
pub struct RtpPacket {
    /// Media type of the owning source group
    pub media_type: MediaType,

    /// Codec resolved from the payload type
    pub codec: Codec,

    /// RTP header
    pub header: RtpHeader,

    /// Header extension values
    pub extension: RtpHeaderExtension,

    /// Payload data
    pub payload: Bytes,

    /// Sequence number wrap count
    cycles: u16,

    /// Receive or send time in milliseconds
    time: u64,
}

impl RtpPacket {
    /// Create a new packet
    pub fn new(media_type: MediaType, codec: Codec, header: RtpHeader, payload: Bytes) -> Self {
        Self {
            media_type,
            codec,
            header,
            extension: RtpHeaderExtension::default(),
            payload,
            cycles: 0,
            time: 0,
        }
    }

    /// Create a packet from parsed wire pieces
    pub fn from_parsed(media_type: MediaType, codec: Codec, parsed: ParsedRtp) -> Self {
        Self {
            media_type,
            codec,
            header: parsed.header,
            extension: parsed.extension,
            payload: parsed.payload,
            cycles: 0,
            time: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn seq_num(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn seq_cycles(&self) -> u16 {
        self.cycles
    }

    pub fn set_seq_cycles(&mut self, cycles: u16) {
        self.cycles = cycles;
    }

    /// Extended sequence number: cycles in the high 16 bits
    pub fn ext_seq_num(&self) -> u32 {
        (self.cycles as u32) << 16 | self.header.sequence_number as u32
    }

    /// Set sequence number and cycles from an extended sequence number
    pub fn set_ext_seq_num(&mut self, ext_seq: u32) {
        self.cycles = (ext_seq >> 16) as u16;
        self.header.sequence_number = ext_seq as u16;
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn set_time(&mut self, time: u64) {
        self.time = time;
    }

    pub fn transport_seq_num(&self) -> Option<u16> {
        self.extension.transport_seq_num
    }

    /// Drop the first `len` payload bytes
    pub fn skip_payload(&mut self, len: usize) -> Result<()> {
        if self.payload.len() < len {
            return Err(Error::BufferTooSmall {
                required: len,
                available: self.payload.len(),
            });
        }
        self.payload.advance(len);
        Ok(())
    }

    /// Serialize into a buffer no larger than `max_size`
    ///
    /// Padding is never emitted; the padding flag is written cleared.
    pub fn serialize(&self, extensions: &ExtensionMap, max_size: usize) -> Result<BytesMut> {
        self.write(None, extensions, max_size)
    }

    /// Serialize as an RTX packet: the original sequence number is written
    /// as a 2-byte prefix before the payload
    pub fn serialize_rtx(&self, original_seq: u16, extensions: &ExtensionMap, max_size: usize) -> Result<BytesMut> {
        self.write(Some(original_seq), extensions, max_size)
    }

    fn write(&self, prefix: Option<u16>, extensions: &ExtensionMap, max_size: usize) -> Result<BytesMut> {
        let mut ext = BytesMut::new();
        let ext_len = self.extension.serialize(extensions, &mut ext)?;

        if self.header.csrc.len() > RTP_MAX_CSRC_COUNT {
            return Err(Error::ProtocolParse(format!(
                "Packet carries {} CSRCs, at most {} fit the header",
                self.header.csrc.len(),
                RTP_MAX_CSRC_COUNT
            )));
        }

        let mut header = self.header.clone();
        header.padding = false;
        header.extension = ext_len > 0;
        header.cc = header.csrc.len() as u8;

        let prefix_len = if prefix.is_some() { 2 } else { 0 };
        let total = header.size() + ext_len + prefix_len + self.payload.len();
        if total > max_size {
            return Err(Error::ProtocolParse(format!(
                "Serialized packet of {} bytes exceeds MTU of {}",
                total, max_size
            )));
        }

        let mut buf = BytesMut::with_capacity(total);
        header.serialize(&mut buf)?;
        buf.put_slice(&ext);
        if let Some(seq) = prefix {
            buf.put_u16(seq);
        }
        buf.put_slice(&self.payload);

        Ok(buf)
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("media_type", &self.media_type)
            .field("codec", &self.codec)
            .field("ssrc", &self.header.ssrc)
            .field("ext_seq", &self.ext_seq_num())
            .field("pt", &self.header.payload_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
