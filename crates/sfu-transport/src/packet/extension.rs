//! RTP header extensions (RFC 8285)
//!
//! Extension elements are identified on the wire by small numeric IDs that
//! are negotiated per session. The [`ExtensionMap`] translates those IDs to
//! the fixed set of [`ExtensionKind`]s this transport understands.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::error::Error;
use crate::Result;

/// Profile marker of the one-byte header form
pub const ONE_BYTE_PROFILE: u16 = 0xBEDE;

/// Profile marker of the two-byte header form (low 4 bits are app bits)
pub const TWO_BYTE_PROFILE: u16 = 0x1000;

/// Highest element ID usable with the one-byte form
pub const MAX_ONE_BYTE_ID: u8 = 14;

/// Semantic kinds of header extensions understood by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    /// Transmission time offset (RFC 5450)
    TimeOffset,

    /// Absolute send time (6.18 fixed point seconds)
    AbsSendTime,

    /// Client-to-mixer audio level (RFC 6464)
    AudioLevel,

    /// Coordination of video orientation (3GPP TS 26.114)
    VideoOrientation,

    /// Transport-wide sequence number for congestion control
    TransportWideCc,
}

impl ExtensionKind {
    /// All kinds, in URI table order
    pub const ALL: [ExtensionKind; 5] = [
        ExtensionKind::TimeOffset,
        ExtensionKind::AbsSendTime,
        ExtensionKind::AudioLevel,
        ExtensionKind::VideoOrientation,
        ExtensionKind::TransportWideCc,
    ];

    /// Negotiation URI of this kind
    pub fn uri(&self) -> &'static str {
        match self {
            ExtensionKind::TimeOffset => "urn:ietf:params:rtp-hdrext:toffset",
            ExtensionKind::AbsSendTime => "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time",
            ExtensionKind::AudioLevel => "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
            ExtensionKind::VideoOrientation => "urn:3gpp:video-orientation",
            ExtensionKind::TransportWideCc => {
                "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01"
            }
        }
    }

    /// Look up a kind by negotiation URI
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uri() == uri)
    }

    /// Payload length of one element of this kind
    fn element_len(&self) -> usize {
        match self {
            ExtensionKind::TimeOffset | ExtensionKind::AbsSendTime => 3,
            ExtensionKind::AudioLevel | ExtensionKind::VideoOrientation => 1,
            ExtensionKind::TransportWideCc => 2,
        }
    }
}

/// Negotiated mapping from extension ID to kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    by_id: HashMap<u8, ExtensionKind>,
}

impl ExtensionMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an ID to a kind, replacing any previous mapping for that ID
    pub fn insert(&mut self, id: u8, kind: ExtensionKind) {
        self.by_id.insert(id, kind);
    }

    /// Kind mapped to an ID
    pub fn get(&self, id: u8) -> Option<ExtensionKind> {
        self.by_id.get(&id).copied()
    }

    /// ID mapped to a kind (lowest ID wins if negotiated twice)
    pub fn id_for(&self, kind: ExtensionKind) -> Option<u8> {
        self.by_id
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
            .min()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }
}

/// Audio level indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLevel {
    /// Voice activity flag
    pub voice_activity: bool,

    /// Level in -dBov (0..=127)
    pub level: u8,
}

/// Video orientation indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoOrientation {
    /// Back-facing camera
    pub camera: bool,

    /// Horizontal flip
    pub flip: bool,

    /// Rotation in quarter turns (0..=3)
    pub rotation: u8,
}

/// Parsed header extension values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpHeaderExtension {
    /// Transmission time offset in RTP timestamp units (24-bit signed)
    pub time_offset: Option<i32>,

    /// Absolute send time (24-bit, 6.18 fixed point seconds)
    pub abs_send_time: Option<u32>,

    /// Audio level
    pub audio_level: Option<AudioLevel>,

    /// Video orientation
    pub video_orientation: Option<VideoOrientation>,

    /// Transport-wide sequence number
    pub transport_seq_num: Option<u16>,
}

impl RtpHeaderExtension {
    /// Whether no element is present
    pub fn is_empty(&self) -> bool {
        self.time_offset.is_none()
            && self.abs_send_time.is_none()
            && self.audio_level.is_none()
            && self.video_orientation.is_none()
            && self.transport_seq_num.is_none()
    }

    /// Parse an extension block positioned at its 4-byte profile header
    ///
    /// Elements whose ID is not in `map` are skipped. Elements of a known
    /// kind with the wrong length fail the whole block.
    pub fn parse(map: &ExtensionMap, buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let profile = buf.get_u16();
        let length = buf.get_u16() as usize * 4;
        if buf.remaining() < length {
            return Err(Error::BufferTooSmall {
                required: length,
                available: buf.remaining(),
            });
        }

        let data = buf.copy_to_bytes(length);
        let mut extension = Self::default();

        if profile == ONE_BYTE_PROFILE {
            let mut i = 0;
            while i < data.len() {
                let byte = data[i];
                if byte == 0 {
                    // Padding
                    i += 1;
                    continue;
                }
                let id = byte >> 4;
                let len = (byte & 0x0F) as usize + 1;
                if id == 15 {
                    break;
                }
                i += 1;
                if i + len > data.len() {
                    return Err(Error::ProtocolParse(format!(
                        "Header extension element {} overruns block ({} + {} > {})",
                        id, i, len, data.len()
                    )));
                }
                extension.apply(map, id, &data[i..i + len])?;
                i += len;
            }
        } else if profile & 0xFFF0 == TWO_BYTE_PROFILE {
            let mut i = 0;
            while i < data.len() {
                let id = data[i];
                if id == 0 {
                    i += 1;
                    continue;
                }
                if i + 1 >= data.len() {
                    return Err(Error::ProtocolParse("Truncated two-byte extension element".to_string()));
                }
                let len = data[i + 1] as usize;
                i += 2;
                if i + len > data.len() {
                    return Err(Error::ProtocolParse(format!(
                        "Header extension element {} overruns block ({} + {} > {})",
                        id, i, len, data.len()
                    )));
                }
                extension.apply(map, id, &data[i..i + len])?;
                i += len;
            }
        } else {
            trace!("Skipping header extension with unknown profile 0x{:04x}", profile);
        }

        Ok(extension)
    }

    fn apply(&mut self, map: &ExtensionMap, id: u8, value: &[u8]) -> Result<()> {
        let kind = match map.get(id) {
            Some(kind) => kind,
            None => {
                trace!("Ignoring unmapped header extension id {}", id);
                return Ok(());
            }
        };

        if value.len() != kind.element_len() {
            return Err(Error::ProtocolParse(format!(
                "Header extension {:?} has length {}, expected {}",
                kind, value.len(), kind.element_len()
            )));
        }

        match kind {
            ExtensionKind::TimeOffset => {
                let raw = (value[0] as i32) << 16 | (value[1] as i32) << 8 | value[2] as i32;
                // Sign-extend from 24 bits
                self.time_offset = Some((raw << 8) >> 8);
            }
            ExtensionKind::AbsSendTime => {
                self.abs_send_time = Some((value[0] as u32) << 16 | (value[1] as u32) << 8 | value[2] as u32);
            }
            ExtensionKind::AudioLevel => {
                self.audio_level = Some(AudioLevel {
                    voice_activity: value[0] & 0x80 != 0,
                    level: value[0] & 0x7F,
                });
            }
            ExtensionKind::VideoOrientation => {
                self.video_orientation = Some(VideoOrientation {
                    camera: value[0] & 0x08 != 0,
                    flip: value[0] & 0x04 != 0,
                    rotation: value[0] & 0x03,
                });
            }
            ExtensionKind::TransportWideCc => {
                self.transport_seq_num = Some(u16::from_be_bytes([value[0], value[1]]));
            }
        }

        Ok(())
    }

    /// Serialize present elements in the one-byte form
    ///
    /// Elements whose kind has no negotiated ID are left out. Returns the
    /// number of bytes written, which is 0 when nothing was written.
    pub fn serialize(&self, map: &ExtensionMap, buf: &mut BytesMut) -> Result<usize> {
        let mut elements = BytesMut::new();

        for kind in ExtensionKind::ALL {
            let value: Option<Vec<u8>> = match kind {
                ExtensionKind::TimeOffset => self.time_offset.map(|v| {
                    let v = v as u32;
                    vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
                }),
                ExtensionKind::AbsSendTime => self
                    .abs_send_time
                    .map(|v| vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]),
                ExtensionKind::AudioLevel => self
                    .audio_level
                    .map(|a| vec![(a.voice_activity as u8) << 7 | (a.level & 0x7F)]),
                ExtensionKind::VideoOrientation => self.video_orientation.map(|o| {
                    vec![(o.camera as u8) << 3 | (o.flip as u8) << 2 | (o.rotation & 0x03)]
                }),
                ExtensionKind::TransportWideCc => self.transport_seq_num.map(|v| v.to_be_bytes().to_vec()),
            };

            let Some(value) = value else { continue };
            let Some(id) = map.id_for(kind) else {
                trace!("No negotiated id for {:?}, not serialized", kind);
                continue;
            };
            if id == 0 || id > MAX_ONE_BYTE_ID {
                return Err(Error::ProtocolParse(format!(
                    "Extension id {} not representable in one-byte form", id
                )));
            }

            elements.put_u8(id << 4 | (value.len() as u8 - 1));
            elements.put_slice(&value);
        }

        if elements.is_empty() {
            return Ok(0);
        }

        while elements.len() % 4 != 0 {
            elements.put_u8(0);
        }

        buf.put_u16(ONE_BYTE_PROFILE);
        buf.put_u16((elements.len() / 4) as u16);
        buf.put_slice(&elements);

        Ok(4 + elements.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn webrtc_map() -> ExtensionMap {
        let mut map = ExtensionMap::new();
        map.insert(1, ExtensionKind::AudioLevel);
        map.insert(2, ExtensionKind::AbsSendTime);
        map.insert(3, ExtensionKind::TransportWideCc);
        map.insert(4, ExtensionKind::VideoOrientation);
        map.insert(5, ExtensionKind::TimeOffset);
        map
    }

    #[test]
    fn test_uri_lookup() {
        assert_eq!(ExtensionKind::from_uri("urn:3gpp:video-orientation"), Some(ExtensionKind::VideoOrientation));
        assert_eq!(
            ExtensionKind::from_uri("http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01"),
            Some(ExtensionKind::TransportWideCc)
        );
        assert_eq!(ExtensionKind::from_uri("urn:ietf:params:rtp-hdrext:sdes:mid"), None);
    }

    #[test]
    fn test_one_byte_block() {
        let map = webrtc_map();
        let ext = RtpHeaderExtension {
            time_offset: Some(-2),
            abs_send_time: Some(0x123456),
            audio_level: Some(AudioLevel { voice_activity: true, level: 42 }),
            video_orientation: Some(VideoOrientation { camera: true, flip: false, rotation: 1 }),
            transport_seq_num: Some(0xBEEF),
        };

        let mut buf = BytesMut::new();
        let written = ext.serialize(&map, &mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written % 4, 0);
        assert_eq!(&buf[0..2], &[0xBE, 0xDE]);

        let parsed = RtpHeaderExtension::parse(&map, &mut buf.freeze()).unwrap();
        assert_eq!(parsed, ext);
    }

    #[test]
    fn test_unmapped_ids_are_skipped() {
        let mut map = ExtensionMap::new();
        map.insert(3, ExtensionKind::TransportWideCc);

        // id 9 (2 bytes, unknown) then id 3 transport seq 0x0102, then padding
        let data = [0xBE, 0xDE, 0x00, 0x02, 0x91, 0xAA, 0xBB, 0x31, 0x01, 0x02, 0x00, 0x00];
        let parsed = RtpHeaderExtension::parse(&map, &mut Bytes::copy_from_slice(&data)).unwrap();
        assert_eq!(parsed.transport_seq_num, Some(0x0102));
        assert!(parsed.audio_level.is_none());
    }

    #[test]
    fn test_two_byte_block() {
        let map = webrtc_map();
        let data = [0x10, 0x00, 0x00, 0x02, 0x03, 0x02, 0x00, 0x07, 0x01, 0x01, 0x85, 0x00];
        let parsed = RtpHeaderExtension::parse(&map, &mut Bytes::copy_from_slice(&data)).unwrap();
        assert_eq!(parsed.transport_seq_num, Some(7));
        assert_eq!(parsed.audio_level, Some(AudioLevel { voice_activity: true, level: 5 }));
    }

    #[test]
    fn test_malformed_blocks_fail() {
        let map = webrtc_map();

        // Length claims 2 words but only 1 present
        let short = [0xBE, 0xDE, 0x00, 0x02, 0x30, 0x01, 0x02, 0x00];
        assert!(RtpHeaderExtension::parse(&map, &mut Bytes::copy_from_slice(&short)).is_err());

        // Transport-wide element with a 1-byte payload
        let wrong_len = [0xBE, 0xDE, 0x00, 0x01, 0x30, 0x01, 0x00, 0x00];
        assert!(RtpHeaderExtension::parse(&map, &mut Bytes::copy_from_slice(&wrong_len)).is_err());

        // Element overruns the block
        let overrun = [0xBE, 0xDE, 0x00, 0x01, 0x00, 0x00, 0x00, 0x33];
        assert!(RtpHeaderExtension::parse(&map, &mut Bytes::copy_from_slice(&overrun)).is_err());
    }

    #[test]
    fn test_nothing_to_serialize() {
        let mut buf = BytesMut::new();
        let ext = RtpHeaderExtension { transport_seq_num: Some(1), ..Default::default() };
        assert_eq!(ext.serialize(&ExtensionMap::new(), &mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }
}
