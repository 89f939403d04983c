//! Tests for SRTP sessions

use bytes::BytesMut;

use super::*;
use crate::packet::rtcp::{RtcpCompoundPacket, RtcpPacket, RtcpReceiverReport};

/// Decode a hex string
pub(crate) fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn material(seed: u8) -> Vec<u8> {
    (0..30).map(|i| seed.wrapping_add(i)).collect()
}

fn rtp_packet(seq: u16, ssrc: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x80, 96]);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&1234u32.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn pair(suite: SrtpCryptoSuite) -> (SrtpSession, SrtpSession) {
    (
        SrtpSession::new(suite, &material(1), 128).unwrap(),
        SrtpSession::new(suite, &material(1), 128).unwrap(),
    )
}

#[test]
fn test_suite_lookup() {
    assert_eq!(SrtpCryptoSuite::from_name("AES_CM_128_HMAC_SHA1_80").unwrap(), SRTP_AES128_CM_SHA1_80);
    assert_eq!(SrtpCryptoSuite::from_name("NULL_CIPHER_NULL_AUTH").unwrap(), SRTP_NULL_NULL);
    assert!(matches!(
        SrtpCryptoSuite::from_name("AEAD_AES_256_GCM"),
        Err(Error::Configuration(_))
    ));
    assert_eq!(SRTP_AES128_CM_SHA1_32.master_key_len(), 30);
}

#[test]
fn test_wrong_key_length() {
    let err = SrtpSession::new(SRTP_AES128_CM_SHA1_80, &[0u8; 16], 64).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_rtp_round_trip_all_suites() {
    for suite in SUITES {
        let (mut tx, mut rx) = pair(suite);
        let mut buf = rtp_packet(100, 0xABCD, b"hello media");
        let clear = buf.clone();

        let len = tx.protect_rtp(&mut buf).unwrap();
        assert_eq!(len, clear.len() + suite.rtp_tag_length, "{}", suite.name);
        assert_eq!(&buf[..12], &clear[..12]);
        if suite.encryption == SrtpEncryptionAlgorithm::AesCm {
            assert_ne!(&buf[12..clear.len()], &clear[12..], "{}", suite.name);
        }

        let len = rx.unprotect_rtp(&mut buf).unwrap();
        assert_eq!(len, clear.len());
        assert_eq!(buf, clear, "{}", suite.name);
    }
}

#[test]
fn test_tampered_packet_fails_auth() {
    let (mut tx, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    let mut buf = rtp_packet(7, 1, b"payload");
    tx.protect_rtp(&mut buf).unwrap();
    buf[13] ^= 0x01;

    let err = rx.unprotect_rtp(&mut buf).unwrap_err();
    assert_eq!(err.srtp_status(), Some(SrtpStatus::AuthFail));
}

#[test]
fn test_different_keys_fail_auth() {
    let mut tx = SrtpSession::new(SRTP_AES128_CM_SHA1_32, &material(1), 64).unwrap();
    let mut rx = SrtpSession::new(SRTP_AES128_CM_SHA1_32, &material(2), 64).unwrap();
    let mut buf = rtp_packet(7, 1, b"payload");
    tx.protect_rtp(&mut buf).unwrap();
    assert_eq!(rx.unprotect_rtp(&mut buf).unwrap_err().srtp_status(), Some(SrtpStatus::AuthFail));
}

#[test]
fn test_replayed_packet_rejected() {
    let (mut tx, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    let mut buf = rtp_packet(7, 1, b"payload");
    tx.protect_rtp(&mut buf).unwrap();
    let copy = buf.clone();

    rx.unprotect_rtp(&mut buf).unwrap();
    let mut replay = copy;
    assert_eq!(rx.unprotect_rtp(&mut replay).unwrap_err().srtp_status(), Some(SrtpStatus::ReplayFail));
}

#[test]
fn test_rollover_across_wrap() {
    let (mut tx, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    for seq in [65534u16, 65535, 0, 1] {
        let mut buf = rtp_packet(seq, 9, &seq.to_be_bytes());
        tx.protect_rtp(&mut buf).unwrap();
        rx.unprotect_rtp(&mut buf).unwrap();
        assert_eq!(&buf[12..], &seq.to_be_bytes());
    }
}

#[test]
fn test_short_packet_bad_header() {
    let (_, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    let mut buf = BytesMut::from(&[0x80u8, 96, 0, 1][..]);
    assert_eq!(rx.unprotect_rtp(&mut buf).unwrap_err().srtp_status(), Some(SrtpStatus::BadHeader));

    // Header only, no room for the tag
    let mut buf = rtp_packet(1, 1, b"");
    assert_eq!(rx.unprotect_rtp(&mut buf).unwrap_err().srtp_status(), Some(SrtpStatus::BadHeader));
}

#[test]
fn test_rtcp_round_trip() {
    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x1234)));
    let clear = compound.serialize(1500).unwrap();

    for suite in SUITES {
        let (mut tx, mut rx) = pair(suite);
        for _ in 0..3 {
            let mut buf = clear.clone();
            let len = tx.protect_rtcp(&mut buf).unwrap();
            assert_eq!(len, clear.len() + 4 + suite.rtcp_tag_length);
            let len = rx.unprotect_rtcp(&mut buf).unwrap();
            assert_eq!(len, clear.len());
            assert_eq!(buf, clear, "{}", suite.name);
        }
    }
}

#[test]
fn test_rtcp_index_and_e_flag() {
    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(1)));
    let clear = compound.serialize(1500).unwrap();

    let mut tx = SrtpSession::new(SRTP_AES128_CM_SHA1_32, &material(3), 64).unwrap();
    let mut first = clear.clone();
    tx.protect_rtcp(&mut first).unwrap();
    let mut second = clear.clone();
    tx.protect_rtcp(&mut second).unwrap();

    let index_at = clear.len();
    assert_eq!(&first[index_at..index_at + 4], &[0x80, 0, 0, 0]);
    assert_eq!(&second[index_at..index_at + 4], &[0x80, 0, 0, 1]);
    // 80-bit tag even though RTP uses 32 bits
    assert_eq!(first.len(), clear.len() + 4 + 10);

    let mut null = SrtpSession::new(SRTP_NULL_SHA1_80, &material(3), 64).unwrap();
    let mut buf = clear.clone();
    null.protect_rtcp(&mut buf).unwrap();
    assert_eq!(&buf[index_at..index_at + 4], &[0, 0, 0, 0]);
    assert_eq!(&buf[..index_at], &clear[..]);
}

#[test]
fn test_rtcp_replay_rejected() {
    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(1)));
    let mut buf = compound.serialize(1500).unwrap();

    let (mut tx, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    tx.protect_rtcp(&mut buf).unwrap();
    let mut replay = buf.clone();
    rx.unprotect_rtcp(&mut buf).unwrap();
    assert_eq!(rx.unprotect_rtcp(&mut replay).unwrap_err().srtp_status(), Some(SrtpStatus::ReplayFail));
}

#[test]
fn test_forged_packets_leave_no_stream_state() {
    let (_, mut rx) = pair(SRTP_AES128_CM_SHA1_80);
    for ssrc in 0..1000u32 {
        let mut buf = rtp_packet(ssrc as u16, ssrc, &[0xA5; 20]);
        assert_eq!(rx.unprotect_rtp(&mut buf).unwrap_err().srtp_status(), Some(SrtpStatus::AuthFail));
    }
    assert!(rx.streams.is_empty());

    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(0x4242)));
    let mut buf = compound.serialize(1500).unwrap();
    buf.extend_from_slice(&[0x80, 0, 0, 1]);
    buf.extend_from_slice(&[0u8; 10]);
    assert_eq!(rx.unprotect_rtcp(&mut buf).unwrap_err().srtp_status(), Some(SrtpStatus::AuthFail));
    assert!(rx.streams.is_empty());

    // A genuine packet still creates state for its stream
    let (mut tx, _) = pair(SRTP_AES128_CM_SHA1_80);
    let mut buf = rtp_packet(5, 0x77, b"real");
    tx.protect_rtp(&mut buf).unwrap();
    rx.unprotect_rtp(&mut buf).unwrap();
    assert_eq!(rx.streams.len(), 1);
    assert!(rx.streams.contains_key(&0x77));
}
