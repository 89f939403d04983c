use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::error::SrtpStatus;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// AES-128 session key length
pub const SESSION_KEY_LEN: usize = 16;

/// Session and master salt length
pub const SESSION_SALT_LEN: usize = 14;

/// Master key plus master salt, as negotiated by SDES or DTLS-SRTP
#[derive(Clone, PartialEq, Eq)]
pub struct SrtpCryptoKey {
    key: Vec<u8>,
    salt: Vec<u8>,
}

impl SrtpCryptoKey {
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Self {
        Self { key, salt }
    }

    /// Split concatenated key material into key and salt
    pub fn from_material(material: &[u8]) -> Result<Self, SrtpStatus> {
        if material.len() != SESSION_KEY_LEN + SESSION_SALT_LEN {
            return Err(SrtpStatus::BadParam);
        }
        let (key, salt) = material.split_at(SESSION_KEY_LEN);
        Ok(Self::new(key.to_vec(), salt.to_vec()))
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl std::fmt::Debug for SrtpCryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpCryptoKey")
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// XOR `data` with the AES counter mode keystream for `key` and `iv`
pub fn aes_cm_apply(key: &[u8], iv: &[u8; 16], data: &mut [u8]) -> Result<(), SrtpStatus> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv).map_err(|_| SrtpStatus::CipherFail)?;
    cipher.apply_keystream(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srtp::tests::hex;

    #[test]
    fn test_aes_cm_rfc3711_keystream() {
        // RFC 3711 Appendix B.2
        let key = hex("2B7E151628AED2A6ABF7158809CF4F3C");
        let mut iv = [0u8; 16];
        iv[..14].copy_from_slice(&hex("F0F1F2F3F4F5F6F7F8F9FAFBFCFD"));

        let mut keystream = [0u8; 16];
        aes_cm_apply(&key, &iv, &mut keystream).unwrap();
        assert_eq!(keystream.to_vec(), hex("E03EAD0935C95E80E166B16DD92B4EB4"));
    }

    #[test]
    fn test_bad_key_length() {
        let mut data = [0u8; 4];
        assert_eq!(aes_cm_apply(&[0; 8], &[0; 16], &mut data), Err(SrtpStatus::CipherFail));
    }

    #[test]
    fn test_key_material_split() {
        let material: Vec<u8> = (0..30).collect();
        let key = SrtpCryptoKey::from_material(&material).unwrap();
        assert_eq!(key.key(), &material[..16]);
        assert_eq!(key.salt(), &material[16..]);
        assert_eq!(SrtpCryptoKey::from_material(&material[..29]), Err(SrtpStatus::BadParam));
    }
}
