//! DTLS-SRTP handshake collaborator
//!
//! The transport does not run the DTLS state machine itself. It feeds
//! handshake records to a [`DtlsHandshake`] implementation, relays whatever
//! the engine emits and consumes the negotiated SRTP profile and master keys
//! (RFC 5764) once the handshake completes.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::Error;
use crate::Result;

/// Size of a DTLS record header
pub const DTLS_RECORD_HEADER_SIZE: usize = 13;

/// Check whether a datagram is a DTLS record (RFC 7983 demultiplexing)
pub fn is_dtls(data: &[u8]) -> bool {
    data.len() >= DTLS_RECORD_HEADER_SIZE && (20..=63).contains(&data[0])
}

/// DTLS connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsRole {
    /// DTLS client role
    Client,

    /// DTLS server role
    Server,
}

/// Remote `a=setup` attribute (RFC 4145)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsSetup {
    Active,
    Passive,
    ActPass,
    HoldConn,
}

impl DtlsSetup {
    /// Local role implied by the remote setup attribute
    ///
    /// `None` while the remote holds the connection.
    pub fn local_role(&self) -> Option<DtlsRole> {
        match self {
            DtlsSetup::Active => Some(DtlsRole::Server),
            DtlsSetup::Passive | DtlsSetup::ActPass => Some(DtlsRole::Client),
            DtlsSetup::HoldConn => None,
        }
    }
}

impl FromStr for DtlsSetup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(DtlsSetup::Active),
            "passive" => Ok(DtlsSetup::Passive),
            "actpass" => Ok(DtlsSetup::ActPass),
            "holdconn" => Ok(DtlsSetup::HoldConn),
            _ => Err(Error::Configuration(format!("Unknown DTLS setup {}", s))),
        }
    }
}

/// Certificate fingerprint hash function (RFC 8122)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintHash {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl FingerprintHash {
    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            FingerprintHash::Sha1 => 20,
            FingerprintHash::Sha224 => 28,
            FingerprintHash::Sha256 => 32,
            FingerprintHash::Sha384 => 48,
            FingerprintHash::Sha512 => 64,
        }
    }
}

impl FromStr for FingerprintHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHA-1" => Ok(FingerprintHash::Sha1),
            "SHA-224" => Ok(FingerprintHash::Sha224),
            "SHA-256" => Ok(FingerprintHash::Sha256),
            "SHA-384" => Ok(FingerprintHash::Sha384),
            "SHA-512" => Ok(FingerprintHash::Sha512),
            _ => Err(Error::Configuration(format!("Unknown fingerprint hash {}", s))),
        }
    }
}

impl fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FingerprintHash::Sha1 => "sha-1",
            FingerprintHash::Sha224 => "sha-224",
            FingerprintHash::Sha256 => "sha-256",
            FingerprintHash::Sha384 => "sha-384",
            FingerprintHash::Sha512 => "sha-512",
        };
        f.write_str(name)
    }
}

/// SRTP protection profile negotiated by the `use_srtp` extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsSrtpProfile {
    AesCm128HmacSha1_80,
    AesCm128HmacSha1_32,
    F8_128HmacSha1_80,
}

impl DtlsSrtpProfile {
    /// Name of the SRTP crypto suite used to key both directions
    ///
    /// F8 is not supported by the SRTP sessions, which fall back to the null
    /// cipher with the same authentication.
    pub fn srtp_suite_name(&self) -> &'static str {
        match self {
            DtlsSrtpProfile::AesCm128HmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
            DtlsSrtpProfile::AesCm128HmacSha1_32 => "AES_CM_128_HMAC_SHA1_32",
            DtlsSrtpProfile::F8_128HmacSha1_80 => "NULL_CIPHER_HMAC_SHA1_80",
        }
    }
}

/// Output of a completed DTLS-SRTP handshake
#[derive(Clone, PartialEq, Eq)]
pub struct DtlsSrtpSetup {
    /// Negotiated protection profile
    pub profile: DtlsSrtpProfile,

    /// Master key and salt protecting what we send
    pub local_key: Vec<u8>,

    /// Master key and salt protecting what we receive
    pub remote_key: Vec<u8>,
}

impl fmt::Debug for DtlsSrtpSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsSrtpSetup")
            .field("profile", &self.profile)
            .field("local_key_len", &self.local_key.len())
            .field("remote_key_len", &self.remote_key.len())
            .finish()
    }
}

/// DTLS handshake engine driven by the transport
///
/// All methods are called with the transport lock held and must not call
/// back into the transport.
pub trait DtlsHandshake: Send {
    /// Feed a received handshake record
    fn write(&mut self, data: &[u8]);

    /// Take the next record the engine wants to send, if any
    fn read(&mut self) -> Option<Bytes>;

    /// Remote setup attribute from the offer/answer
    fn set_remote_setup(&mut self, setup: DtlsSetup);

    /// Remote certificate fingerprint from the offer/answer
    fn set_remote_fingerprint(&mut self, hash: FingerprintHash, fingerprint: &str);

    /// Start the handshake once setup and fingerprint are known
    fn init(&mut self) -> Result<()>;

    /// Negotiated keys, returned once after the handshake completes
    fn take_srtp_setup(&mut self) -> Option<DtlsSrtpSetup>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_dtls() {
        let mut record = vec![22u8, 0xFE, 0xFD];
        record.resize(DTLS_RECORD_HEADER_SIZE, 0);
        assert!(is_dtls(&record));

        // RTP and RTCP start at 128
        record[0] = 0x80;
        assert!(!is_dtls(&record));
        // STUN starts at 0 or 1
        record[0] = 0x00;
        assert!(!is_dtls(&record));
        // Too short for a record header
        assert!(!is_dtls(&[22, 0xFE, 0xFD]));
    }

    #[test]
    fn test_setup_parsing() {
        assert_eq!("active".parse::<DtlsSetup>().unwrap(), DtlsSetup::Active);
        assert_eq!("PASSIVE".parse::<DtlsSetup>().unwrap(), DtlsSetup::Passive);
        assert_eq!("actpass".parse::<DtlsSetup>().unwrap(), DtlsSetup::ActPass);
        assert_eq!("holdconn".parse::<DtlsSetup>().unwrap(), DtlsSetup::HoldConn);
        assert!(matches!("both".parse::<DtlsSetup>(), Err(Error::Configuration(_))));

        assert_eq!(DtlsSetup::Active.local_role(), Some(DtlsRole::Server));
        assert_eq!(DtlsSetup::ActPass.local_role(), Some(DtlsRole::Client));
        assert_eq!(DtlsSetup::HoldConn.local_role(), None);
    }

    #[test]
    fn test_hash_parsing() {
        assert_eq!("sha-256".parse::<FingerprintHash>().unwrap(), FingerprintHash::Sha256);
        assert_eq!("SHA-1".parse::<FingerprintHash>().unwrap(), FingerprintHash::Sha1);
        assert_eq!("SHA-512".parse::<FingerprintHash>().unwrap().digest_len(), 64);
        assert!("md5".parse::<FingerprintHash>().is_err());
        assert_eq!(FingerprintHash::Sha384.to_string(), "sha-384");
    }

    #[test]
    fn test_profile_suite_names() {
        assert_eq!(DtlsSrtpProfile::AesCm128HmacSha1_32.srtp_suite_name(), "AES_CM_128_HMAC_SHA1_32");
        assert_eq!(DtlsSrtpProfile::F8_128HmacSha1_80.srtp_suite_name(), "NULL_CIPHER_HMAC_SHA1_80");
    }
}
