//! RTCP feedback messages (RFC 4585, RFC 5104)
//!
//! Transport-layer feedback (`RTPFB`, PT 205) and payload-specific feedback
//! (`PSFB`, PT 206) share one layout: sender SSRC, media SSRC and a
//! format-specific FCI section selected by the FMT field of the common header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};
use super::twcc::TransportWideFeedback;

/// RTPFB format: generic NACK
pub const RTPFB_FMT_NACK: u8 = 1;
/// RTPFB format: temporary maximum media stream bit rate request
pub const RTPFB_FMT_TMMBR: u8 = 3;
/// RTPFB format: temporary maximum media stream bit rate notification
pub const RTPFB_FMT_TMMBN: u8 = 4;
/// RTPFB format: transport-wide congestion control feedback
pub const RTPFB_FMT_TRANSPORT_WIDE: u8 = 15;

/// PSFB format: picture loss indication
pub const PSFB_FMT_PLI: u8 = 1;
/// PSFB format: slice loss indication
pub const PSFB_FMT_SLI: u8 = 2;
/// PSFB format: reference picture selection indication
pub const PSFB_FMT_RPSI: u8 = 3;
/// PSFB format: full intra request
pub const PSFB_FMT_FIR: u8 = 4;
/// PSFB format: temporal-spatial trade-off request
pub const PSFB_FMT_TSTR: u8 = 5;
/// PSFB format: temporal-spatial trade-off notification
pub const PSFB_FMT_TSTN: u8 = 6;
/// PSFB format: video back channel message
pub const PSFB_FMT_VBCM: u8 = 7;
/// PSFB format: application layer feedback
pub const PSFB_FMT_APPLICATION: u8 = 15;

/// Generic NACK field: a packet ID plus a bitmask of the 16 following packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackField {
    /// Sequence number of the first lost packet
    pub pid: u16,

    /// Bit `i` set means `pid + i + 1` is also lost
    pub blp: u16,
}

impl NackField {
    pub fn new(pid: u16, blp: u16) -> Self {
        Self { pid, blp }
    }

    /// All sequence numbers requested by this field, in order
    pub fn sequence_numbers(&self) -> Vec<u16> {
        let mut seqs = vec![self.pid];
        for i in 0..16u16 {
            if (self.blp >> i) & 1 == 1 {
                seqs.push(self.pid.wrapping_add(i + 1));
            }
        }
        seqs
    }

    /// Pack ascending extended sequence numbers into NACK fields
    pub fn pack(lost: &[u32]) -> Vec<NackField> {
        let mut fields: Vec<NackField> = Vec::new();
        let mut base: Option<u32> = None;

        for &seq in lost {
            match base {
                Some(b) if seq > b && seq - b <= 16 => {
                    if let Some(field) = fields.last_mut() {
                        field.blp |= 1 << (seq - b - 1);
                    }
                }
                _ => {
                    base = Some(seq);
                    fields.push(NackField::new(seq as u16, 0));
                }
            }
        }

        fields
    }
}

/// Full intra request entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirEntry {
    /// SSRC of the stream that should send a key frame
    pub ssrc: RtpSsrc,

    /// Command sequence number
    pub seq: u8,
}

/// Receiver estimated maximum bitrate (draft-alvestrand-rmcat-remb)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remb {
    /// Estimated bitrate in bits per second
    pub bitrate: u64,

    /// SSRCs the estimate applies to
    pub ssrcs: Vec<RtpSsrc>,
}

impl Remb {
    /// Unique identifier at the start of the application data
    pub const MAGIC: &'static [u8; 4] = b"REMB";

    /// Decode an application-layer FCI if it carries a REMB message
    pub fn parse(fci: &[u8]) -> Option<Self> {
        if fci.len() < 8 || &fci[0..4] != Self::MAGIC {
            return None;
        }

        let num_ssrcs = fci[4] as usize;
        let exp = fci[5] >> 2;
        let mantissa = ((fci[5] & 0x03) as u64) << 16 | (fci[6] as u64) << 8 | fci[7] as u64;
        let bitrate = mantissa << exp;

        let ssrcs = fci[8..]
            .chunks_exact(4)
            .take(num_ssrcs)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Some(Self { bitrate, ssrcs })
    }

    /// Encode as application-layer FCI
    pub fn to_bytes(&self) -> Bytes {
        let mut exp = 0u8;
        let mut mantissa = self.bitrate;
        while mantissa >= (1 << 18) {
            mantissa >>= 1;
            exp += 1;
        }

        let mut buf = BytesMut::with_capacity(8 + self.ssrcs.len() * 4);
        buf.put_slice(Self::MAGIC);
        buf.put_u8(self.ssrcs.len() as u8);
        buf.put_u8(exp << 2 | (mantissa >> 16) as u8);
        buf.put_u16(mantissa as u16);
        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }
        buf.freeze()
    }
}

/// Transport-layer feedback messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpFeedbackMessage {
    /// Generic NACK
    Nack(Vec<NackField>),

    /// Transport-wide congestion control feedback
    TransportWide(TransportWideFeedback),

    /// Any other format, kept opaque
    Other { fmt: u8, fci: Bytes },
}

/// Transport-layer feedback packet (PT 205)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpRtpFeedback {
    pub sender_ssrc: RtpSsrc,
    pub media_ssrc: RtpSsrc,
    pub message: RtpFeedbackMessage,
}

impl RtcpRtpFeedback {
    pub fn nack(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc, fields: Vec<NackField>) -> Self {
        Self { sender_ssrc, media_ssrc, message: RtpFeedbackMessage::Nack(fields) }
    }

    pub fn transport_wide(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc, feedback: TransportWideFeedback) -> Self {
        Self { sender_ssrc, media_ssrc, message: RtpFeedbackMessage::TransportWide(feedback) }
    }

    /// FMT value for the common header
    pub fn fmt(&self) -> u8 {
        match &self.message {
            RtpFeedbackMessage::Nack(_) => RTPFB_FMT_NACK,
            RtpFeedbackMessage::TransportWide(_) => RTPFB_FMT_TRANSPORT_WIDE,
            RtpFeedbackMessage::Other { fmt, .. } => *fmt,
        }
    }

    /// Parse the body of a transport-layer feedback packet
    pub fn parse(fmt: u8, buf: &mut impl Buf) -> Result<Self> {
        let (sender_ssrc, media_ssrc) = parse_ssrcs(buf)?;
        let fci = buf.copy_to_bytes(buf.remaining());

        let message = match fmt {
            RTPFB_FMT_NACK => {
                if fci.len() % 4 != 0 {
                    return Err(Error::ProtocolParse(format!("NACK FCI length {} not a multiple of 4", fci.len())));
                }
                let fields = fci
                    .chunks_exact(4)
                    .map(|c| NackField::new(u16::from_be_bytes([c[0], c[1]]), u16::from_be_bytes([c[2], c[3]])))
                    .collect();
                RtpFeedbackMessage::Nack(fields)
            }
            RTPFB_FMT_TRANSPORT_WIDE => RtpFeedbackMessage::TransportWide(TransportWideFeedback::parse(&fci)?),
            other => RtpFeedbackMessage::Other { fmt: other, fci },
        };

        Ok(Self { sender_ssrc, media_ssrc, message })
    }

    /// Serialize the body of a transport-layer feedback packet
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        match &self.message {
            RtpFeedbackMessage::Nack(fields) => {
                for field in fields {
                    buf.put_u16(field.pid);
                    buf.put_u16(field.blp);
                }
            }
            RtpFeedbackMessage::TransportWide(feedback) => feedback.serialize(buf)?,
            RtpFeedbackMessage::Other { fci, .. } => put_padded(buf, fci),
        }
        Ok(())
    }
}

/// Payload-specific feedback messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFeedbackMessage {
    /// Picture loss indication
    PictureLoss,

    /// Full intra request
    FullIntraRequest(Vec<FirEntry>),

    /// Application layer feedback (e.g. REMB)
    ApplicationLayer(Bytes),

    /// Any other format, kept opaque
    Other { fmt: u8, fci: Bytes },
}

/// Payload-specific feedback packet (PT 206)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpPayloadFeedback {
    pub sender_ssrc: RtpSsrc,
    pub media_ssrc: RtpSsrc,
    pub message: PayloadFeedbackMessage,
}

impl RtcpPayloadFeedback {
    pub fn pli(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc) -> Self {
        Self { sender_ssrc, media_ssrc, message: PayloadFeedbackMessage::PictureLoss }
    }

    pub fn fmt(&self) -> u8 {
        match &self.message {
            PayloadFeedbackMessage::PictureLoss => PSFB_FMT_PLI,
            PayloadFeedbackMessage::FullIntraRequest(_) => PSFB_FMT_FIR,
            PayloadFeedbackMessage::ApplicationLayer(_) => PSFB_FMT_APPLICATION,
            PayloadFeedbackMessage::Other { fmt, .. } => *fmt,
        }
    }

    /// Decoded REMB, if this is application-layer feedback carrying one
    pub fn remb(&self) -> Option<Remb> {
        match &self.message {
            PayloadFeedbackMessage::ApplicationLayer(fci) => Remb::parse(fci),
            _ => None,
        }
    }

    /// Parse the body of a payload-specific feedback packet
    pub fn parse(fmt: u8, buf: &mut impl Buf) -> Result<Self> {
        let (sender_ssrc, media_ssrc) = parse_ssrcs(buf)?;
        let fci = buf.copy_to_bytes(buf.remaining());

        let message = match fmt {
            PSFB_FMT_PLI => PayloadFeedbackMessage::PictureLoss,
            PSFB_FMT_FIR => {
                if fci.len() % 8 != 0 {
                    return Err(Error::ProtocolParse(format!("FIR FCI length {} not a multiple of 8", fci.len())));
                }
                let entries = fci
                    .chunks_exact(8)
                    .map(|c| FirEntry { ssrc: u32::from_be_bytes([c[0], c[1], c[2], c[3]]), seq: c[4] })
                    .collect();
                PayloadFeedbackMessage::FullIntraRequest(entries)
            }
            PSFB_FMT_APPLICATION => PayloadFeedbackMessage::ApplicationLayer(fci),
            other => PayloadFeedbackMessage::Other { fmt: other, fci },
        };

        Ok(Self { sender_ssrc, media_ssrc, message })
    }

    /// Serialize the body of a payload-specific feedback packet
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        match &self.message {
            PayloadFeedbackMessage::PictureLoss => {}
            PayloadFeedbackMessage::FullIntraRequest(entries) => {
                for entry in entries {
                    buf.put_u32(entry.ssrc);
                    buf.put_u8(entry.seq);
                    buf.put_slice(&[0, 0, 0]);
                }
            }
            PayloadFeedbackMessage::ApplicationLayer(fci) | PayloadFeedbackMessage::Other { fci, .. } => {
                put_padded(buf, fci)
            }
        }
        Ok(())
    }
}

fn parse_ssrcs(buf: &mut impl Buf) -> Result<(RtpSsrc, RtpSsrc)> {
    if buf.remaining() < 8 {
        return Err(Error::BufferTooSmall {
            required: 8,
            available: buf.remaining(),
        });
    }
    Ok((buf.get_u32(), buf.get_u32()))
}

fn put_padded(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(data);
    for _ in 0..(4 - data.len() % 4) % 4 {
        buf.put_u8(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nack_field_sequences() {
        let field = NackField::new(12, 0b0000_0000_0000_0101);
        assert_eq!(field.sequence_numbers(), vec![12, 13, 15]);

        let wrapping = NackField::new(65535, 1);
        assert_eq!(wrapping.sequence_numbers(), vec![65535, 0]);
    }

    #[test]
    fn test_nack_pack() {
        assert_eq!(NackField::pack(&[12]), vec![NackField::new(12, 0)]);
        assert_eq!(NackField::pack(&[12, 13, 28]), vec![NackField::new(12, 0x8001)]);
        assert_eq!(
            NackField::pack(&[12, 29, 30]),
            vec![NackField::new(12, 0), NackField::new(29, 1)]
        );
        assert!(NackField::pack(&[]).is_empty());
    }

    #[test]
    fn test_nack_body() {
        let nack = RtcpRtpFeedback::nack(1, 0xAABB, vec![NackField::new(100, 3)]);
        let mut buf = BytesMut::new();
        nack.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 12);

        let parsed = RtcpRtpFeedback::parse(RTPFB_FMT_NACK, &mut buf.freeze()).unwrap();
        assert_eq!(parsed, nack);
    }

    #[test]
    fn test_remb_decoding() {
        // exp = 3, mantissa = 0x1_2345 -> 0x1_2345 << 3
        let fci = [b'R', b'E', b'M', b'B', 1, (3 << 2) | 0x01, 0x23, 0x45, 0, 0, 0, 7];
        let remb = Remb::parse(&fci).unwrap();
        assert_eq!(remb.bitrate, 0x1_2345 << 3);
        assert_eq!(remb.ssrcs, vec![7]);

        assert!(Remb::parse(b"TMMB\x00\x00\x00\x00").is_none());
        assert!(Remb::parse(b"REMB").is_none());
    }

    #[test]
    fn test_remb_encoding() {
        let remb = Remb { bitrate: 2_500_000, ssrcs: vec![0x1111, 0x2222] };
        let decoded = Remb::parse(&remb.to_bytes()).unwrap();
        assert_eq!(decoded.ssrcs, remb.ssrcs);
        // Mantissa truncation loses at most the shifted-out bits
        assert!(decoded.bitrate <= remb.bitrate);
        assert!(remb.bitrate - decoded.bitrate < 1 << 4);
    }

    #[test]
    fn test_fir_and_pli_bodies() {
        let fir = RtcpPayloadFeedback {
            sender_ssrc: 1,
            media_ssrc: 0,
            message: PayloadFeedbackMessage::FullIntraRequest(vec![FirEntry { ssrc: 0x55, seq: 9 }]),
        };
        let mut buf = BytesMut::new();
        fir.serialize(&mut buf).unwrap();
        let parsed = RtcpPayloadFeedback::parse(PSFB_FMT_FIR, &mut buf.freeze()).unwrap();
        assert_eq!(parsed, fir);

        let pli = RtcpPayloadFeedback::pli(1, 0x55);
        let mut buf = BytesMut::new();
        pli.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(RtcpPayloadFeedback::parse(PSFB_FMT_PLI, &mut buf.freeze()).unwrap(), pli);
    }

    #[test]
    fn test_short_feedback_fails() {
        let mut data = Bytes::from_static(&[0, 0, 0, 1]);
        assert!(RtcpPayloadFeedback::parse(PSFB_FMT_PLI, &mut data).is_err());
    }
}
