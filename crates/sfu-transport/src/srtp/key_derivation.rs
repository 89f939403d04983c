use crate::error::SrtpStatus;
use super::crypto::{aes_cm_apply, SrtpCryptoKey, SESSION_KEY_LEN, SESSION_SALT_LEN};

/// Label values for SRTP key derivation
/// Based on RFC 3711 Section 4.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDerivationLabel {
    /// RTP encryption key
    RtpEncryption = 0,

    /// RTP authentication key
    RtpAuthentication = 1,

    /// RTP salt (for IV creation)
    RtpSalt = 2,

    /// RTCP encryption key
    RtcpEncryption = 3,

    /// RTCP authentication key
    RtcpAuthentication = 4,

    /// RTCP salt (for IV creation)
    RtcpSalt = 5,
}

/// Perform the AES-CM pseudo random function of RFC 3711 Section 4.3.3
///
/// The key derivation rate is zero, so the derived keys do not depend on the
/// packet index.
pub fn srtp_kdf(master_key: &SrtpCryptoKey, label: KeyDerivationLabel, output_len: usize) -> Result<Vec<u8>, SrtpStatus> {
    let salt = master_key.salt();
    if salt.len() != SESSION_SALT_LEN {
        return Err(SrtpStatus::BadParam);
    }

    let mut iv = [0u8; 16];
    iv[..SESSION_SALT_LEN].copy_from_slice(salt);
    iv[7] ^= label as u8;

    let mut output = vec![0u8; output_len];
    aes_cm_apply(master_key.key(), &iv, &mut output)?;
    Ok(output)
}

/// Create the AES-CM initialization vector (RFC 3711 Section 4.1.1)
///
/// `IV = (salt * 2^16) XOR (SSRC * 2^64) XOR (index * 2^16)`
pub fn create_srtp_iv(salt: &[u8], ssrc: u32, packet_index: u64) -> Result<[u8; 16], SrtpStatus> {
    if salt.len() != SESSION_SALT_LEN {
        return Err(SrtpStatus::BadParam);
    }

    let mut iv = [0u8; 16];
    iv[..SESSION_SALT_LEN].copy_from_slice(salt);

    for (byte, ssrc_byte) in iv[4..8].iter_mut().zip(ssrc.to_be_bytes()) {
        *byte ^= ssrc_byte;
    }
    // 48-bit index
    for (byte, index_byte) in iv[8..14].iter_mut().zip(&packet_index.to_be_bytes()[2..]) {
        *byte ^= index_byte;
    }

    Ok(iv)
}

/// Session keys for one of the RTP or RTCP directions of a session
#[derive(Clone)]
pub struct SessionKeys {
    pub cipher_key: Vec<u8>,
    pub auth_key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl SessionKeys {
    /// Derive the RTP session keys
    pub fn rtp(master_key: &SrtpCryptoKey, auth_key_len: usize) -> Result<Self, SrtpStatus> {
        Ok(Self {
            cipher_key: srtp_kdf(master_key, KeyDerivationLabel::RtpEncryption, SESSION_KEY_LEN)?,
            auth_key: srtp_kdf(master_key, KeyDerivationLabel::RtpAuthentication, auth_key_len)?,
            salt: srtp_kdf(master_key, KeyDerivationLabel::RtpSalt, SESSION_SALT_LEN)?,
        })
    }

    /// Derive the RTCP session keys
    pub fn rtcp(master_key: &SrtpCryptoKey, auth_key_len: usize) -> Result<Self, SrtpStatus> {
        Ok(Self {
            cipher_key: srtp_kdf(master_key, KeyDerivationLabel::RtcpEncryption, SESSION_KEY_LEN)?,
            auth_key: srtp_kdf(master_key, KeyDerivationLabel::RtcpAuthentication, auth_key_len)?,
            salt: srtp_kdf(master_key, KeyDerivationLabel::RtcpSalt, SESSION_SALT_LEN)?,
        })
    }
}
