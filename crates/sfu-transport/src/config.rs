//! Transport configuration
//!
//! Two kinds of configuration feed the transport:
//!
//! - [`TransportConfig`]: local tuning (MTU, buffer bounds, retention
//!   windows), built with [`TransportConfigBuilder`] or deserialized.
//! - [`MediaProperties`]: the negotiated codec payload types and header
//!   extension IDs, turned into lookup tables by
//!   [`MediaProperties::negotiated_maps`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use crate::error::Error;
use crate::packet::{ExtensionKind, ExtensionMap, MAX_ONE_BYTE_ID};
use crate::DEFAULT_MAX_PACKET_SIZE;

/// Kind of media carried by a source group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            other => Err(Error::Configuration(format!("Unknown media type: {}", other))),
        }
    }
}

/// Codecs the transport can route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Pcmu,
    Pcma,
    G722,
    Opus,
    Vp8,
    Vp9,
    H264,
    Av1,
    /// Retransmission payload format (RFC 4588)
    Rtx,
    /// Flexible forward error correction
    FlexFec,
}

impl Codec {
    /// Look up a codec by its SDP encoding name
    pub fn from_name(name: &str) -> Option<Self> {
        let codec = match name.to_ascii_lowercase().as_str() {
            "pcmu" => Codec::Pcmu,
            "pcma" => Codec::Pcma,
            "g722" => Codec::G722,
            "opus" => Codec::Opus,
            "vp8" => Codec::Vp8,
            "vp9" => Codec::Vp9,
            "h264" => Codec::H264,
            "av1" => Codec::Av1,
            "rtx" => Codec::Rtx,
            "flexfec" | "flexfec-03" => Codec::FlexFec,
            _ => return None,
        };
        Some(codec)
    }

    /// Media type of a media codec; `None` for RTX and FEC
    pub fn media_type(&self) -> Option<MediaType> {
        match self {
            Codec::Pcmu | Codec::Pcma | Codec::G722 | Codec::Opus => Some(MediaType::Audio),
            Codec::Vp8 | Codec::Vp9 | Codec::H264 | Codec::Av1 => Some(MediaType::Video),
            Codec::Rtx | Codec::FlexFec => None,
        }
    }
}

/// Payload type to codec table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpMap {
    types: BTreeMap<u8, Codec>,
}

impl RtpMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, payload_type: u8, codec: Codec) {
        self.types.insert(payload_type, codec);
    }

    /// Codec negotiated for a payload type
    pub fn codec_for_type(&self, payload_type: u8) -> Option<Codec> {
        self.types.get(&payload_type).copied()
    }

    /// Lowest payload type negotiated for a codec
    pub fn type_for_codec(&self, codec: Codec) -> Option<u8> {
        self.types
            .iter()
            .find(|(_, c)| **c == codec)
            .map(|(pt, _)| *pt)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// RTX payload type to protected codec table (the `apt` parameter)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AptMap {
    associated: BTreeMap<u8, Codec>,
}

impl AptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rtx_payload_type: u8, codec: Codec) {
        self.associated.insert(rtx_payload_type, codec);
    }

    /// Codec protected by an RTX payload type
    pub fn codec_for_type(&self, rtx_payload_type: u8) -> Option<Codec> {
        self.associated.get(&rtx_payload_type).copied()
    }

    /// RTX payload type protecting a codec
    pub fn rtx_type_for_codec(&self, codec: Codec) -> Option<u8> {
        self.associated
            .iter()
            .find(|(_, c)| **c == codec)
            .map(|(pt, _)| *pt)
    }
}

/// One negotiated codec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodecProperties {
    /// SDP encoding name, e.g. `opus` or `VP9`
    pub name: String,

    /// Payload type
    pub pt: u8,

    /// RTX payload type protecting this codec
    #[serde(default)]
    pub rtx: Option<u8>,
}

/// Codecs negotiated for one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MediaKindProperties {
    #[serde(default)]
    pub codecs: Vec<CodecProperties>,

    /// FlexFEC payload type
    #[serde(default)]
    pub flexfec: Option<u8>,
}

/// Negotiated media properties
///
/// ```json
/// {
///   "audio": { "codecs": [{ "name": "opus", "pt": 111 }] },
///   "video": { "codecs": [{ "name": "vp9", "pt": 98, "rtx": 99 }], "flexfec": 100 },
///   "extensions": { "urn:3gpp:video-orientation": 4 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MediaProperties {
    #[serde(default)]
    pub audio: MediaKindProperties,

    #[serde(default)]
    pub video: MediaKindProperties,

    /// Extension URI to negotiated ID
    #[serde(default)]
    pub extensions: HashMap<String, u8>,
}

/// Lookup tables derived from [`MediaProperties`]
#[derive(Debug, Clone, Default)]
pub struct NegotiatedMaps {
    pub rtp_map: RtpMap,
    pub apt_map: AptMap,
    pub extensions: ExtensionMap,
}

impl MediaProperties {
    /// Build the codec, RTX association and extension tables
    ///
    /// Unknown codec names and extension URIs are logged and skipped.
    pub fn negotiated_maps(&self) -> NegotiatedMaps {
        let mut maps = NegotiatedMaps::default();

        for (media_type, kind) in [(MediaType::Audio, &self.audio), (MediaType::Video, &self.video)] {
            for props in &kind.codecs {
                let Some(codec) = Codec::from_name(&props.name) else {
                    warn!("Unknown {} codec '{}' (pt {}) ignored", media_type, props.name, props.pt);
                    continue;
                };
                if codec.media_type() != Some(media_type) {
                    warn!("Codec {:?} listed under {} ignored", codec, media_type);
                    continue;
                }
                maps.rtp_map.insert(props.pt, codec);
                if let Some(rtx) = props.rtx {
                    maps.rtp_map.insert(rtx, Codec::Rtx);
                    maps.apt_map.insert(rtx, codec);
                }
            }
            if let Some(fec) = kind.flexfec {
                maps.rtp_map.insert(fec, Codec::FlexFec);
            }
        }

        for (uri, id) in &self.extensions {
            let Some(kind) = ExtensionKind::from_uri(uri) else {
                warn!("Unknown RTP header extension '{}' (id {}) ignored", uri, id);
                continue;
            };
            if *id == 0 || *id > MAX_ONE_BYTE_ID {
                warn!("RTP header extension '{}' has unusable id {}", uri, id);
                continue;
            }
            maps.extensions.insert(*id, kind);
        }

        maps
    }
}

/// Local transport tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum serialized packet size in bytes
    pub mtu: usize,

    /// Longest time a packet waits in the reorder buffer for a gap to fill
    pub reorder_max_wait_ms: u64,

    /// Maximum packets held by the reorder buffer
    pub reorder_capacity: usize,

    /// Distance behind the newest packet beyond which losses are forgotten
    pub loss_window: u32,

    /// Minimum retention of sent packets for retransmission
    pub rtx_min_retention_ms: u64,

    /// Maximum retention of sent packets for retransmission
    pub rtx_max_retention_ms: u64,

    /// SRTP replay window size in packets
    pub replay_window: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MAX_PACKET_SIZE,
            reorder_max_wait_ms: 100,
            reorder_capacity: 512,
            loss_window: 512,
            rtx_min_retention_ms: 200,
            rtx_max_retention_ms: 500,
            replay_window: 1024,
        }
    }
}

impl TransportConfig {
    /// Retention window for shadowed packets given the measured RTT
    pub fn rtx_retention_ms(&self, rtt_ms: u64) -> u64 {
        let span = self.rtx_max_retention_ms.saturating_sub(self.rtx_min_retention_ms);
        self.rtx_min_retention_ms + rtt_ms.saturating_mul(2).min(span)
    }
}

/// Builder for TransportConfig
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MTU
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the reorder buffer wait and capacity
    pub fn reorder_buffer(mut self, max_wait_ms: u64, capacity: usize) -> Self {
        self.config.reorder_max_wait_ms = max_wait_ms;
        self.config.reorder_capacity = capacity;
        self
    }

    /// Set the loss tracking window
    pub fn loss_window(mut self, window: u32) -> Self {
        self.config.loss_window = window;
        self
    }

    /// Set the retransmission retention floor and ceiling
    pub fn rtx_retention(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.config.rtx_min_retention_ms = min_ms;
        self.config.rtx_max_retention_ms = max_ms;
        self
    }

    /// Set the SRTP replay window
    pub fn replay_window(mut self, window: u64) -> Self {
        self.config.replay_window = window;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<TransportConfig, Error> {
        let config = self.config;
        if config.mtu < crate::packet::RTP_MIN_HEADER_SIZE {
            return Err(Error::Configuration(format!("MTU {} too small", config.mtu)));
        }
        if config.rtx_min_retention_ms > config.rtx_max_retention_ms {
            return Err(Error::Configuration(format!(
                "RTX retention floor {} ms above ceiling {} ms",
                config.rtx_min_retention_ms, config.rtx_max_retention_ms
            )));
        }
        if config.replay_window == 0 || config.reorder_capacity == 0 {
            return Err(Error::Configuration("Window sizes must be non-zero".to_string()));
        }
        Ok(config)
    }
}
