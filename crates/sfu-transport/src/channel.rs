//! Secure channel: the send and receive SRTP sessions of one transport

use bytes::BytesMut;
use tracing::{debug, info};

use crate::error::Error;
use crate::srtp::{SrtpCryptoSuite, SrtpSession};
use crate::Result;

/// Which side of the channel a session protects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Packets we send, keyed with the local master key
    Send,

    /// Packets we receive, keyed with the remote master key
    Receive,
}

/// Exactly one send and one receive crypto session
#[derive(Debug)]
pub struct SecureChannel {
    send: Option<SrtpSession>,
    recv: Option<SrtpSession>,
    replay_window: u64,
}

impl SecureChannel {
    pub fn new(replay_window: u64) -> Self {
        Self {
            send: None,
            recv: None,
            replay_window,
        }
    }

    /// Build a session for `direction`, replacing and releasing the previous one
    ///
    /// On failure the existing session is left untouched.
    pub fn configure(&mut self, direction: Direction, suite_name: &str, key: &[u8]) -> Result<()> {
        let suite = SrtpCryptoSuite::from_name(suite_name)?;
        if key.len() != suite.master_key_len() {
            return Err(Error::Configuration(format!(
                "Key size ({}) doesn't match the selected srtp profile {} (required {})",
                key.len(),
                suite.name,
                suite.master_key_len()
            )));
        }

        let session = SrtpSession::new(suite, key, self.replay_window)?;
        info!("Configured {:?} SRTP session with suite {}", direction, suite.name);

        let slot = match direction {
            Direction::Send => &mut self.send,
            Direction::Receive => &mut self.recv,
        };
        if slot.replace(session).is_some() {
            debug!("Released previous {:?} SRTP session", direction);
        }
        Ok(())
    }

    pub fn can_send(&self) -> bool {
        self.send.is_some()
    }

    pub fn can_receive(&self) -> bool {
        self.recv.is_some()
    }

    fn send_session(&mut self) -> Result<&mut SrtpSession> {
        self.send
            .as_mut()
            .ok_or_else(|| Error::NotReady("No send SRTP session".to_string()))
    }

    fn recv_session(&mut self) -> Result<&mut SrtpSession> {
        self.recv
            .as_mut()
            .ok_or_else(|| Error::NotReady("No receive SRTP session".to_string()))
    }

    pub fn encrypt_rtp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.send_session()?.protect_rtp(buf)
    }

    pub fn decrypt_rtp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.recv_session()?.unprotect_rtp(buf)
    }

    pub fn encrypt_rtcp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.send_session()?.protect_rtcp(buf)
    }

    pub fn decrypt_rtcp(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.recv_session()?.unprotect_rtcp(buf)
    }

    /// Drop both sessions
    pub fn reset(&mut self) {
        self.send = None;
        self.recv = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SrtpStatus;

    const KEY: [u8; 30] = [7u8; 30];

    fn rtp(seq: u16) -> BytesMut {
        let mut buf = BytesMut::from(&[0x80u8, 111, 0, 0, 0, 0, 0, 1, 0, 0, 0, 5][..]);
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(b"voice");
        buf
    }

    #[test]
    fn test_not_ready_without_sessions() {
        let mut channel = SecureChannel::new(64);
        assert!(matches!(channel.encrypt_rtp(&mut rtp(1)), Err(Error::NotReady(_))));
        assert!(matches!(channel.decrypt_rtcp(&mut rtp(1)), Err(Error::NotReady(_))));
    }

    #[test]
    fn test_configure_validation() {
        let mut channel = SecureChannel::new(64);
        assert!(matches!(
            channel.configure(Direction::Send, "AES_CM_256_HMAC_SHA1_80", &KEY),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            channel.configure(Direction::Send, "AES_CM_128_HMAC_SHA1_80", &KEY[..16]),
            Err(Error::Configuration(_))
        ));
        assert!(!channel.can_send());

        channel.configure(Direction::Send, "AES_CM_128_HMAC_SHA1_80", &KEY).unwrap();
        assert!(channel.can_send());
        assert!(!channel.can_receive());

        // A failed reconfigure keeps the working session
        assert!(channel.configure(Direction::Send, "bogus", &KEY).is_err());
        assert!(channel.can_send());
    }

    #[test]
    fn test_loopback_encrypt_decrypt() {
        let mut channel = SecureChannel::new(64);
        channel.configure(Direction::Send, "AES_CM_128_HMAC_SHA1_32", &KEY).unwrap();
        channel.configure(Direction::Receive, "AES_CM_128_HMAC_SHA1_32", &KEY).unwrap();

        let mut buf = rtp(42);
        let clear = buf.clone();
        let len = channel.encrypt_rtp(&mut buf).unwrap();
        assert_eq!(len, clear.len() + 4);
        assert_eq!(channel.decrypt_rtp(&mut buf).unwrap(), clear.len());
        assert_eq!(buf, clear);

        // Crypto failures leave the session in place
        let mut garbage = rtp(43);
        garbage.extend_from_slice(&[0; 4]);
        assert_eq!(channel.decrypt_rtp(&mut garbage).unwrap_err().srtp_status(), Some(SrtpStatus::AuthFail));
        assert!(channel.can_receive());
    }

    #[test]
    fn test_reset_drops_sessions() {
        let mut channel = SecureChannel::new(64);
        channel.configure(Direction::Receive, "NULL_CIPHER_NULL_AUTH", &KEY).unwrap();
        channel.reset();
        assert!(!channel.can_receive());
    }
}
