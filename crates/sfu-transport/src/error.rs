use thiserror::Error;
use std::fmt;
use std::io;

/// Status codes reported by an SRTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpStatus {
    /// Malformed key material or parameters
    BadParam,

    /// Packet too short to carry a header and tag
    BadHeader,

    /// Authentication tag did not verify
    AuthFail,

    /// Packet index already seen inside the replay window
    ReplayFail,

    /// Packet index older than the replay window
    ReplayOld,

    /// Keystream generation failed
    CipherFail,
}

impl fmt::Display for SrtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SrtpStatus::BadParam => "bad_param",
            SrtpStatus::BadHeader => "bad_header",
            SrtpStatus::AuthFail => "auth_fail",
            SrtpStatus::ReplayFail => "replay_fail",
            SrtpStatus::ReplayOld => "replay_old",
            SrtpStatus::CipherFail => "cipher_fail",
        };
        write!(f, "{}", name)
    }
}

/// Error type for media transport operations
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Bad suite name, wrong key length, unknown DTLS role or hash
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed header, extension or RTCP, or an oversized serialization
    #[error("Failed to parse packet: {0}")]
    ProtocolParse(String),

    /// Buffer too small
    #[error("Buffer too small for packet: need {required} but have {available}")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },

    /// Non-OK status returned by an SRTP session
    #[error("SRTP error: {status}")]
    Crypto {
        status: SrtpStatus,
    },

    /// No crypto session configured for the requested direction
    #[error("Crypto session not ready: {0}")]
    NotReady(String),

    /// Unknown SSRC, payload type or group
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Operation attempted before the transport can carry it
    #[error("Invalid transport state: {0}")]
    State(String),

    /// IO error when sending packets
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Whether this error came from decoding or encoding wire data
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::ProtocolParse(_) | Error::BufferTooSmall { .. })
    }

    /// Whether a dropped inbound datagram failed at the decryption stage
    pub fn is_crypto_drop(&self) -> bool {
        matches!(self, Error::Crypto { .. } | Error::NotReady(_))
    }

    /// The SRTP status, if this is a crypto failure
    pub fn srtp_status(&self) -> Option<SrtpStatus> {
        match self {
            Error::Crypto { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<SrtpStatus> for Error {
    fn from(status: SrtpStatus) -> Self {
        Error::Crypto { status }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
