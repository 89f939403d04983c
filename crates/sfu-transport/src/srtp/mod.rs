//! Secure RTP (SRTP) implementation
//!
//! This module provides encryption and authentication for RTP/RTCP packets
//! (RFC 3711). A [`SrtpSession`] covers one direction of a transport and keeps
//! per-SSRC rollover counters, SRTCP indices and replay windows.

pub mod auth;
pub mod crypto;
pub mod key_derivation;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::{Error, SrtpStatus};
use crate::seq::WrapExtender;
use crate::{Result, RtpSsrc};

pub use auth::{SrtpAuthenticator, SrtpReplayProtection, AUTH_KEY_LEN};
pub use crypto::{SrtpCryptoKey, SESSION_KEY_LEN, SESSION_SALT_LEN};
pub use key_derivation::{create_srtp_iv, srtp_kdf, KeyDerivationLabel, SessionKeys};

/// SRTCP header bytes left in the clear
const SRTCP_CLEAR_HEADER: usize = 8;

/// E flag plus 31-bit SRTCP index
const SRTCP_INDEX_SIZE: usize = 4;

/// Largest trailer protection appends: SRTCP index plus an 80-bit tag
pub const SRTP_MAX_TRAILER_LEN: usize = SRTCP_INDEX_SIZE + 10;

const SRTCP_E_FLAG: u32 = 0x8000_0000;
const SRTCP_INDEX_MASK: u32 = 0x7FFF_FFFF;

/// SRTP encryption algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpEncryptionAlgorithm {
    /// AES Counter Mode (Default in SRTP)
    AesCm,

    /// Null encryption
    Null,
}

/// SRTP authentication algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpAuthenticationAlgorithm {
    /// HMAC-SHA1 truncated to 80 bits (Default in SRTP)
    HmacSha1_80,

    /// HMAC-SHA1 truncated to 32 bits
    HmacSha1_32,

    /// Null authentication
    Null,
}

/// SRTP crypto suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtpCryptoSuite {
    /// Name as used in SDES and by the DTLS-SRTP handshake
    pub name: &'static str,

    /// Encryption algorithm
    pub encryption: SrtpEncryptionAlgorithm,

    /// Authentication algorithm
    pub authentication: SrtpAuthenticationAlgorithm,

    /// SRTP authentication tag length in bytes
    pub rtp_tag_length: usize,

    /// SRTCP authentication tag length in bytes
    pub rtcp_tag_length: usize,
}

/// AES-CM-128 + HMAC-SHA1-80
pub const SRTP_AES128_CM_SHA1_80: SrtpCryptoSuite = SrtpCryptoSuite {
    name: "AES_CM_128_HMAC_SHA1_80",
    encryption: SrtpEncryptionAlgorithm::AesCm,
    authentication: SrtpAuthenticationAlgorithm::HmacSha1_80,
    rtp_tag_length: 10,
    rtcp_tag_length: 10,
};

/// AES-CM-128 + HMAC-SHA1-32; SRTCP keeps the 80-bit tag (RFC 5764 Section 4.1.2)
pub const SRTP_AES128_CM_SHA1_32: SrtpCryptoSuite = SrtpCryptoSuite {
    name: "AES_CM_128_HMAC_SHA1_32",
    encryption: SrtpEncryptionAlgorithm::AesCm,
    authentication: SrtpAuthenticationAlgorithm::HmacSha1_32,
    rtp_tag_length: 4,
    rtcp_tag_length: 10,
};

/// AES-CM-128 without authentication
pub const SRTP_AES128_CM_NULL: SrtpCryptoSuite = SrtpCryptoSuite {
    name: "AES_CM_128_NULL_AUTH",
    encryption: SrtpEncryptionAlgorithm::AesCm,
    authentication: SrtpAuthenticationAlgorithm::Null,
    rtp_tag_length: 0,
    rtcp_tag_length: 0,
};

/// Null encryption with HMAC-SHA1-80
pub const SRTP_NULL_SHA1_80: SrtpCryptoSuite = SrtpCryptoSuite {
    name: "NULL_CIPHER_HMAC_SHA1_80",
    encryption: SrtpEncryptionAlgorithm::Null,
    authentication: SrtpAuthenticationAlgorithm::HmacSha1_80,
    rtp_tag_length: 10,
    rtcp_tag_length: 10,
};

/// No encryption or authentication
pub const SRTP_NULL_NULL: SrtpCryptoSuite = SrtpCryptoSuite {
    name: "NULL_CIPHER_NULL_AUTH",
    encryption: SrtpEncryptionAlgorithm::Null,
    authentication: SrtpAuthenticationAlgorithm::Null,
    rtp_tag_length: 0,
    rtcp_tag_length: 0,
};

const SUITES: [SrtpCryptoSuite; 5] = [
    SRTP_AES128_CM_SHA1_80,
    SRTP_AES128_CM_SHA1_32,
    SRTP_AES128_CM_NULL,
    SRTP_NULL_SHA1_80,
    SRTP_NULL_NULL,
];

impl SrtpCryptoSuite {
    /// Look up a suite by its name
    pub fn from_name(name: &str) -> Result<Self> {
        SUITES
            .iter()
            .find(|suite| suite.name == name)
            .copied()
            .ok_or_else(|| Error::Configuration(format!("Unknown SRTP crypto suite {}", name)))
    }

    /// Required master key plus master salt length
    pub fn master_key_len(&self) -> usize {
        SESSION_KEY_LEN + SESSION_SALT_LEN
    }
}

/// Per-SSRC state of a session
#[derive(Debug)]
struct StreamState {
    /// Rollover counter tracking
    roc: WrapExtender<u16, u64>,

    /// SRTP replay window
    replay: SrtpReplayProtection,

    /// Next SRTCP index to send
    rtcp_index: u32,

    /// SRTCP replay window
    rtcp_replay: SrtpReplayProtection,
}

impl StreamState {
    fn new(window: u64) -> Self {
        Self {
            roc: WrapExtender::new(),
            replay: SrtpReplayProtection::new(window),
            rtcp_index: 0,
            rtcp_replay: SrtpReplayProtection::new(window),
        }
    }
}

struct DerivedKeys {
    keys: SessionKeys,
    auth: SrtpAuthenticator,
}

impl DerivedKeys {
    fn new(keys: SessionKeys, algorithm: SrtpAuthenticationAlgorithm, tag_length: usize) -> Self {
        let auth = SrtpAuthenticator::new(algorithm, keys.auth_key.clone(), tag_length);
        Self { keys, auth }
    }
}

/// One direction of SRTP/SRTCP protection
pub struct SrtpSession {
    suite: SrtpCryptoSuite,
    rtp: DerivedKeys,
    rtcp: DerivedKeys,
    streams: HashMap<RtpSsrc, StreamState>,
    replay_window: u64,
}

impl SrtpSession {
    /// Create a session from concatenated master key and salt
    pub fn new(suite: SrtpCryptoSuite, material: &[u8], replay_window: u64) -> Result<Self> {
        if material.len() != suite.master_key_len() {
            return Err(Error::Configuration(format!(
                "{} needs {} bytes of key material, got {}",
                suite.name,
                suite.master_key_len(),
                material.len()
            )));
        }

        let master = SrtpCryptoKey::from_material(material)?;
        let rtp = SessionKeys::rtp(&master, AUTH_KEY_LEN)?;
        let rtcp = SessionKeys::rtcp(&master, AUTH_KEY_LEN)?;

        // SRTCP authenticates with the 80-bit tag unless authentication is off
        let rtcp_auth = match suite.authentication {
            SrtpAuthenticationAlgorithm::HmacSha1_32 => SrtpAuthenticationAlgorithm::HmacSha1_80,
            other => other,
        };

        Ok(Self {
            suite,
            rtp: DerivedKeys::new(rtp, suite.authentication, suite.rtp_tag_length),
            rtcp: DerivedKeys::new(rtcp, rtcp_auth, suite.rtcp_tag_length),
            streams: HashMap::new(),
            replay_window,
        })
    }

    pub fn suite(&self) -> &SrtpCryptoSuite {
        &self.suite
    }

    fn stream(&mut self, ssrc: RtpSsrc) -> &mut StreamState {
        let window = self.replay_window;
        self.streams.entry(ssrc).or_insert_with(|| StreamState::new(window))
    }

    fn encrypts(&self) -> bool {
        self.suite.encryption == SrtpEncryptionAlgorithm::AesCm
    }

    /// Encrypt and authenticate an RTP packet in place, returning the new length
    pub fn protect_rtp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let header_len = rtp_header_len(buf)?;
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let roc = self.stream(ssrc).roc.extend(seq);
        let index = roc << 16 | seq as u64;

        if self.encrypts() {
            let iv = create_srtp_iv(&self.rtp.keys.salt, ssrc, index)?;
            crypto::aes_cm_apply(&self.rtp.keys.cipher_key, &iv, &mut buf[header_len..])?;
        }

        let tag = self.rtp.auth.calculate_auth_tag(buf, roc as u32)?;
        buf.put_slice(&tag);

        trace!("Protected RTP ssrc={} seq={} roc={} len={}", ssrc, seq, roc, buf.len());
        Ok(buf.len())
    }

    /// Verify and decrypt an SRTP packet in place, returning the new length
    pub fn unprotect_rtp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let header_len = rtp_header_len(buf)?;
        let tag_len = self.rtp.auth.tag_length();
        if buf.len() < header_len + tag_len {
            return Err(SrtpStatus::BadHeader.into());
        }

        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        // State for an unseen SSRC is only kept once the tag checks out
        let (roc, index) = match self.streams.get(&ssrc) {
            Some(stream) => {
                let roc = stream.roc.recover_cycles(seq);
                let index = roc << 16 | seq as u64;
                stream.replay.check(index)?;
                (roc, index)
            }
            None => (0, seq as u64),
        };

        let body_len = buf.len() - tag_len;
        let expected = self.rtp.auth.calculate_auth_tag(&buf[..body_len], roc as u32)?;
        self.rtp.auth.verify(&expected, &buf[body_len..])?;

        let stream = self.stream(ssrc);
        stream.replay.accept(index);
        stream.roc.extend(seq);
        buf.truncate(body_len);

        if self.encrypts() {
            let iv = create_srtp_iv(&self.rtp.keys.salt, ssrc, index)?;
            crypto::aes_cm_apply(&self.rtp.keys.cipher_key, &iv, &mut buf[header_len..])?;
        }

        Ok(buf.len())
    }

    /// Encrypt and authenticate a compound RTCP packet in place
    pub fn protect_rtcp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        if buf.len() < SRTCP_CLEAR_HEADER {
            return Err(SrtpStatus::BadHeader.into());
        }
        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let stream = self.stream(ssrc);
        let index = stream.rtcp_index;
        stream.rtcp_index = (index + 1) & SRTCP_INDEX_MASK;

        let encrypted = self.encrypts();
        if encrypted {
            let iv = create_srtp_iv(&self.rtcp.keys.salt, ssrc, index as u64)?;
            crypto::aes_cm_apply(&self.rtcp.keys.cipher_key, &iv, &mut buf[SRTCP_CLEAR_HEADER..])?;
        }

        let e_index = if encrypted { SRTCP_E_FLAG | index } else { index };
        buf.put_u32(e_index);
        let tag = self.rtcp.auth.calculate_rtcp_auth_tag(buf)?;
        buf.put_slice(&tag);

        Ok(buf.len())
    }

    /// Verify and decrypt an SRTCP packet in place
    pub fn unprotect_rtcp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let tag_len = self.rtcp.auth.tag_length();
        if buf.len() < SRTCP_CLEAR_HEADER + SRTCP_INDEX_SIZE + tag_len {
            return Err(SrtpStatus::BadHeader.into());
        }

        let body_len = buf.len() - tag_len;
        let expected = self.rtcp.auth.calculate_rtcp_auth_tag(&buf[..body_len])?;
        self.rtcp.auth.verify(&expected, &buf[body_len..])?;

        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let index_pos = body_len - SRTCP_INDEX_SIZE;
        let e_index = u32::from_be_bytes([buf[index_pos], buf[index_pos + 1], buf[index_pos + 2], buf[index_pos + 3]]);
        let index = e_index & SRTCP_INDEX_MASK;

        if let Some(stream) = self.streams.get(&ssrc) {
            stream.rtcp_replay.check(index as u64)?;
        }
        self.stream(ssrc).rtcp_replay.accept(index as u64);

        buf.truncate(index_pos);
        if e_index & SRTCP_E_FLAG != 0 {
            if !self.encrypts() {
                return Err(SrtpStatus::CipherFail.into());
            }
            let iv = create_srtp_iv(&self.rtcp.keys.salt, ssrc, index as u64)?;
            crypto::aes_cm_apply(&self.rtcp.keys.cipher_key, &iv, &mut buf[SRTCP_CLEAR_HEADER..])?;
        }

        Ok(buf.len())
    }
}

impl std::fmt::Debug for SrtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpSession")
            .field("suite", &self.suite.name)
            .field("streams", &self.streams.len())
            .finish()
    }
}

/// Length of the RTP header including CSRCs and the extension block
fn rtp_header_len(data: &[u8]) -> std::result::Result<usize, SrtpStatus> {
    if data.len() < 12 || data[0] >> 6 != 2 {
        return Err(SrtpStatus::BadHeader);
    }

    let mut len = 12 + 4 * (data[0] & 0x0F) as usize;
    if data[0] & 0x10 != 0 {
        if data.len() < len + 4 {
            return Err(SrtpStatus::BadHeader);
        }
        let words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + 4 * words;
    }

    if data.len() < len {
        return Err(SrtpStatus::BadHeader);
    }
    Ok(len)
}
