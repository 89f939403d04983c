//! Send path tests: protection, retransmission, RTCP feedback handling

mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::*;

use rvoip_sfu_transport::packet::rtcp::{NackField, PayloadFeedbackMessage, RtcpPayloadFeedback, RtcpRtpFeedback};
use rvoip_sfu_transport::prelude::*;

#[test]
fn test_retransmit_within_retention() {
    let pair = Pair::new(false);
    let recorder = Arc::new(Recorder::default());
    let (out, _) = pair.video_route(recorder);

    pair.a.transport.send_rtp(video_packet(100, b"keep me")).unwrap();
    pair.a.wire.take();

    pair.clock.advance_millis(40);
    assert!(pair.a.transport.retransmit(out, 100));

    let sent = pair.a.wire.take();
    assert_eq!(sent.len(), 1);
    let mut tap = Tap::new(&KEY_A, false);
    let rtx = tap.rtp(&sent[0]);
    assert_eq!(rtx.header.ssrc, VIDEO_RTX_SSRC);
    assert_eq!(rtx.header.payload_type, RTX_PT);
    assert_eq!(&rtx.payload[..2], &[0x00, 0x64]);
    assert_eq!(&rtx.payload[2..], b"keep me");

    // Past the retention window the packet is gone
    pair.clock.advance_millis(600);
    assert!(!pair.a.transport.retransmit(out, 100));
    assert_eq!(pair.a.wire.len(), 0);
}

#[test]
fn test_rtx_sequence_numbers_are_consecutive() {
    let pair = Pair::new(false);
    let recorder = Arc::new(Recorder::default());
    let (out, _) = pair.video_route(recorder);

    for seq in 1..=3 {
        pair.a.transport.send_rtp(video_packet(seq, b"v")).unwrap();
    }
    pair.a.wire.take();

    for seq in [3, 1, 2] {
        assert!(pair.a.transport.retransmit(out, seq));
    }
    let mut tap = Tap::new(&KEY_A, false);
    let sent: Vec<_> = pair.a.wire.take().iter().map(|d| tap.rtp(d)).collect();
    assert_eq!(sent.len(), 3);

    let first = sent[0].header.sequence_number;
    for (offset, parsed) in sent.iter().enumerate() {
        assert_eq!(parsed.header.sequence_number, first.wrapping_add(offset as u16));
    }
    let osns: Vec<u16> = sent.iter().map(|p| u16::from_be_bytes([p.payload[0], p.payload[1]])).collect();
    assert_eq!(osns, vec![3, 1, 2]);
}

#[test]
fn test_retransmit_without_rtx_stream() {
    let pair = Pair::new(false);
    let out = pair
        .a
        .transport
        .add_outgoing_source_group(OutgoingSourceGroup::new(MediaType::Video, VIDEO_SSRC))
        .unwrap();

    pair.a.transport.send_rtp(video_packet(7, b"v")).unwrap();
    pair.a.wire.take();

    assert!(!pair.a.transport.retransmit(out, 7));
    assert_eq!(pair.a.wire.len(), 0);
    assert_eq!(pair.a.transport.with_outgoing_group(out, |g| g.packets.len()), Some(0));
}

#[test]
fn test_send_rtp_errors() {
    init_test_logging();
    let clock = Arc::new(ManualClock::new(START_MS));
    let endpoint = Endpoint::new(clock, "192.0.2.9:9000");
    let transport = &endpoint.transport;
    transport.set_properties(&properties(false));
    transport
        .add_outgoing_source_group(OutgoingSourceGroup::new(MediaType::Video, VIDEO_SSRC))
        .unwrap();

    // Nobody to send to
    let err = transport.send_rtp(video_packet(1, b"v")).unwrap_err();
    assert!(matches!(err, Error::State(_)), "got {:?}", err);

    // Candidate, but no keys
    transport.add_remote_candidate("192.0.2.10:9000".parse().unwrap(), true, 1);
    let err = transport.send_rtp(video_packet(1, b"v")).unwrap_err();
    assert!(matches!(err, Error::NotReady(_)), "got {:?}", err);

    transport.set_local_crypto_sdes(SUITE, &KEY_A).unwrap();

    let mut unknown = video_packet(1, b"v");
    unknown.header.ssrc = 0xABCD;
    let err = transport.send_rtp(unknown).unwrap_err();
    assert!(matches!(err, Error::Lookup(_)), "got {:?}", err);

    let h264 = RtpPacket::new(
        MediaType::Video,
        Codec::H264,
        RtpHeader::new(0, 1, 0, VIDEO_SSRC),
        Bytes::from_static(b"v"),
    );
    let err = transport.send_rtp(h264).unwrap_err();
    assert!(matches!(err, Error::Lookup(_)), "got {:?}", err);

    assert_eq!(endpoint.wire.len(), 0);
    transport.send_rtp(video_packet(1, b"v")).unwrap();
    assert_eq!(endpoint.wire.len(), 1);
}

#[test]
fn test_outgoing_payload_type_follows_codec() {
    let pair = Pair::new(false);
    pair.a
        .transport
        .add_outgoing_source_group(OutgoingSourceGroup::new(MediaType::Audio, AUDIO_SSRC))
        .unwrap();

    let mut header = RtpHeader::new(0, 5, 960, AUDIO_SSRC);
    header.padding = true;
    let packet = RtpPacket::new(MediaType::Audio, Codec::Opus, header, Bytes::from_static(b"opus"));
    pair.a.transport.send_rtp(packet).unwrap();

    let mut tap = Tap::new(&KEY_A, false);
    let parsed = tap.rtp(&pair.a.wire.take()[0]);
    assert_eq!(parsed.header.payload_type, OPUS_PT);
    assert!(!parsed.header.padding);
    assert_eq!(parsed.payload.as_ref(), b"opus");
}

#[test]
fn test_pli_resets_receiver_and_reaches_sender() {
    let pair = Pair::new(false);
    let sender_side = Arc::new(Recorder::default());
    let receiver_side = Arc::new(Recorder::default());
    pair.a
        .transport
        .add_outgoing_source_group(
            OutgoingSourceGroup::new(MediaType::Video, VIDEO_SSRC)
                .with_rtx(VIDEO_RTX_SSRC)
                .with_listener(sender_side.clone()),
        )
        .unwrap();
    let inc = pair
        .b
        .transport
        .add_incoming_source_group(
            IncomingSourceGroup::new(MediaType::Video, VIDEO_SSRC)
                .with_rtx(VIDEO_RTX_SSRC)
                .with_listener(receiver_side.clone()),
        )
        .unwrap();

    for seq in [1u16, 3] {
        pair.a.transport.send_rtp(video_packet(seq, b"v")).unwrap();
    }
    pair.b.receive_all(&pair.a, &pair.a.wire.take());
    pair.b.wire.take();
    assert_eq!(pair.b.transport.with_incoming_group(inc, |g| g.packets.len()), Some(1));

    pair.b.transport.send_pli(VIDEO_SSRC).unwrap();
    assert_eq!(pair.b.transport.with_incoming_group(inc, |g| g.packets.len()), Some(0));

    let pli = pair.b.wire.take();
    assert_eq!(pli.len(), 1);
    let mut tap = Tap::new(&KEY_B, false);
    match &tap.rtcp(&pli[0]).packets[0] {
        RtcpPacket::PayloadFeedback(RtcpPayloadFeedback { media_ssrc, message, .. }) => {
            assert_eq!(*media_ssrc, VIDEO_SSRC);
            assert_eq!(*message, PayloadFeedbackMessage::PictureLoss);
        }
        other => panic!("Expected PLI, got {:?}", other),
    }

    pair.a.receive_all(&pair.b, &pli);
    let requests = sender_side.key_frames.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.media_ssrc, VIDEO_SSRC);
    assert_eq!(requests[0].1, VIDEO_SSRC);
}

#[test]
fn test_pli_for_unknown_source() {
    let pair = Pair::new(false);
    let err = pair.b.transport.send_pli(0x7777).unwrap_err();
    assert!(matches!(err, Error::Lookup(_)), "got {:?}", err);
    assert_eq!(pair.b.wire.len(), 0);
}

#[test]
fn test_receiver_report_feeds_round_trip_time() {
    let pair = Pair::new(false);
    let recorder = Arc::new(Recorder::default());
    let (out, _) = pair.video_route(recorder);

    // Sender report from a, so b's report blocks reference it
    let mut sr = RtcpSenderReport::new(VIDEO_SSRC);
    sr.ntp_timestamp = pair.clock.now_ntp();
    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::SenderReport(sr));
    pair.a.transport.send_rtcp(&compound).unwrap();
    pair.b.receive_all(&pair.a, &pair.a.wire.take());

    for seq in 1..=4 {
        pair.a.transport.send_rtp(video_packet(seq, b"v")).unwrap();
    }
    let mut media = pair.a.wire.take();
    media.remove(2);

    // b holds the report 30ms, the way back takes 20ms
    pair.clock.advance_millis(30);
    pair.b.receive_all(&pair.a, &media);
    let feedback = pair.b.wire.take();
    assert_eq!(feedback.len(), 1);

    pair.clock.advance_millis(20);
    pair.a.receive_all(&pair.b, &feedback);

    let (samples, rtt) = pair
        .a
        .transport
        .with_outgoing_group(out, |g| (g.rtt.samples(), g.rtt.rtt_ms()))
        .unwrap();
    assert_eq!(samples, 1);
    assert!((19..=21).contains(&rtt), "rtt {}", rtt);

    // The NACK for seq 3 got answered too
    assert_eq!(pair.a.wire.len(), 1);
}

#[test]
fn test_feedback_for_unknown_ssrc_is_skipped() {
    let pair = Pair::new(false);
    let recorder = Arc::new(Recorder::default());
    let (out, _) = pair.video_route(recorder.clone());

    pair.a.transport.send_rtp(video_packet(40, b"again")).unwrap();
    pair.a.wire.take();

    // Unknown sources first; the NACK for the real one still gets answered
    let mut compound = RtcpCompoundPacket::new();
    compound.push(RtcpPacket::ReceiverReport(RtcpReceiverReport::new(1)));
    compound.push(RtcpPacket::PayloadFeedback(RtcpPayloadFeedback::pli(1, 0xDEAD)));
    compound.push(RtcpPacket::RtpFeedback(RtcpRtpFeedback::nack(1, 0xBEEF, vec![NackField::new(40, 0)])));
    compound.push(RtcpPacket::RtpFeedback(RtcpRtpFeedback::nack(1, VIDEO_SSRC, vec![NackField::new(40, 0)])));
    pair.b.transport.send_rtcp(&compound).unwrap();
    pair.a.receive_all(&pair.b, &pair.b.wire.take());

    assert!(recorder.key_frames.lock().is_empty());
    assert_eq!(pair.a.transport.with_outgoing_group(out, |g| g.rtt.samples()), Some(0));

    let sent = pair.a.wire.take();
    assert_eq!(sent.len(), 1);
    let mut tap = Tap::new(&KEY_A, false);
    let rtx = tap.rtp(&sent[0]);
    assert_eq!(rtx.header.ssrc, VIDEO_RTX_SSRC);
    assert_eq!(&rtx.payload[..2], &40u16.to_be_bytes());
    assert_eq!(&rtx.payload[2..], b"again");
}
