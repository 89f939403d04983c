use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::SrtpStatus;
use super::SrtpAuthenticationAlgorithm;

// Define type for HMAC-SHA1
type HmacSha1 = Hmac<Sha1>;

/// Session authentication key length for HMAC-SHA1
pub const AUTH_KEY_LEN: usize = 20;

/// SRTP Authentication Handler
#[derive(Clone)]
pub struct SrtpAuthenticator {
    /// Authentication algorithm
    algorithm: SrtpAuthenticationAlgorithm,

    /// Session authentication key
    auth_key: Vec<u8>,

    /// Authentication tag length in bytes
    tag_length: usize,
}

impl SrtpAuthenticator {
    /// Create a new SRTP authenticator
    pub fn new(algorithm: SrtpAuthenticationAlgorithm, auth_key: Vec<u8>, tag_length: usize) -> Self {
        let tag_length = match algorithm {
            SrtpAuthenticationAlgorithm::Null => 0,
            _ => tag_length,
        };
        Self {
            algorithm,
            auth_key,
            tag_length,
        }
    }

    fn mac(&self, parts: &[&[u8]]) -> Result<Vec<u8>, SrtpStatus> {
        let mut mac = HmacSha1::new_from_slice(&self.auth_key).map_err(|_| SrtpStatus::BadParam)?;
        for part in parts {
            mac.update(part);
        }
        let result = mac.finalize().into_bytes();
        Ok(result[..self.tag_length].to_vec())
    }

    /// Calculate the tag of an SRTP packet: HMAC over the packet then the ROC
    pub fn calculate_auth_tag(&self, packet_data: &[u8], roc: u32) -> Result<Vec<u8>, SrtpStatus> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        self.mac(&[packet_data, &roc.to_be_bytes()])
    }

    /// Calculate the tag of an SRTCP packet, which already ends with the E flag and index
    pub fn calculate_rtcp_auth_tag(&self, packet_data: &[u8]) -> Result<Vec<u8>, SrtpStatus> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        self.mac(&[packet_data])
    }

    /// Compare a received tag against the expected one
    pub fn verify(&self, expected: &[u8], tag: &[u8]) -> Result<(), SrtpStatus> {
        if expected.len() != tag.len() {
            return Err(SrtpStatus::AuthFail);
        }

        // Constant-time comparison
        let diff = expected.iter().zip(tag.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff == 0 {
            Ok(())
        } else {
            Err(SrtpStatus::AuthFail)
        }
    }

    /// Get the authentication tag length
    pub fn tag_length(&self) -> usize {
        self.tag_length
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.algorithm != SrtpAuthenticationAlgorithm::Null
    }
}

impl std::fmt::Debug for SrtpAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpAuthenticator")
            .field("algorithm", &self.algorithm)
            .field("tag_length", &self.tag_length)
            .finish()
    }
}

/// SRTP Replay Protection
///
/// Sliding window over packet indices. A packet is first checked, then
/// accepted only after it authenticated, so forged packets never move the
/// window.
#[derive(Debug, Clone)]
pub struct SrtpReplayProtection {
    /// Window size in packets
    window_size: u64,

    /// Highest index accepted
    highest: Option<u64>,

    /// Received flags, indexed by `index % window_size`
    window: Vec<bool>,
}

impl SrtpReplayProtection {
    /// Create a new replay protection context
    pub fn new(window_size: u64) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            highest: None,
            window: vec![false; window_size as usize],
        }
    }

    /// Check whether `index` may be accepted, without recording it
    pub fn check(&self, index: u64) -> Result<(), SrtpStatus> {
        let Some(highest) = self.highest else {
            return Ok(());
        };

        if index > highest {
            return Ok(());
        }
        if index + self.window_size <= highest {
            return Err(SrtpStatus::ReplayOld);
        }
        if self.window[(index % self.window_size) as usize] {
            return Err(SrtpStatus::ReplayFail);
        }
        Ok(())
    }

    /// Record `index` as received
    pub fn accept(&mut self, index: u64) {
        match self.highest {
            None => {
                self.highest = Some(index);
            }
            Some(highest) if index > highest => {
                let diff = index - highest;
                if diff >= self.window_size {
                    self.window.iter_mut().for_each(|slot| *slot = false);
                } else {
                    // Slots of indices leaving the window now belong to the new ones
                    for i in 1..=diff {
                        self.window[((highest + i) % self.window_size) as usize] = false;
                    }
                }
                self.highest = Some(index);
            }
            Some(_) => {}
        }
        self.window[(index % self.window_size) as usize] = true;
    }

    /// Reset the replay protection
    pub fn reset(&mut self) {
        self.highest = None;
        self.window.iter_mut().for_each(|slot| *slot = false);
    }
}
