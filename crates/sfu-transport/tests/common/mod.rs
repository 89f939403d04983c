//! Shared harness for the transport integration tests
//!
//! Two transports, `a` and `b`, are keyed against each other with SDES keys
//! and read one manual clock. Their network collaborators only record what
//! would have been sent; tests move datagrams between them by hand.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use rvoip_sfu_transport::channel::{Direction, SecureChannel};
use rvoip_sfu_transport::packet::rtcp::RtcpCompoundPacket;
use rvoip_sfu_transport::packet::{parse_rtp, ExtensionMap, ParsedRtp};
use rvoip_sfu_transport::prelude::*;

pub const SUITE: &str = "AES_CM_128_HMAC_SHA1_80";
pub const KEY_A: [u8; 30] = [0xA1; 30];
pub const KEY_B: [u8; 30] = [0xB2; 30];

pub const VIDEO_SSRC: RtpSsrc = 0x1111_0000;
pub const VIDEO_RTX_SSRC: RtpSsrc = 0x2222_0000;
pub const VIDEO_FEC_SSRC: RtpSsrc = 0x3333_0000;
pub const AUDIO_SSRC: RtpSsrc = 0x4444_0000;

pub const VP9_PT: u8 = 98;
pub const RTX_PT: u8 = 99;
pub const FEC_PT: u8 = 100;
pub const OPUS_PT: u8 = 111;
pub const TWCC_ID: u8 = 5;

pub const START_MS: u64 = 1_000_000;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Network collaborator recording every datagram
#[derive(Default)]
pub struct Wire {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl Wire {
    /// Take every datagram sent so far
    pub fn take(&self) -> Vec<Vec<u8>> {
        self.sent.lock().drain(..).map(|(_, data)| data).collect()
    }

    /// Take every datagram with its destination
    pub fn take_with_addr(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }
}

impl PacketSender for Wire {
    fn send(&self, candidate: &RemoteCandidate, data: &[u8]) -> std::io::Result<usize> {
        self.sent.lock().push((candidate.addr, data.to_vec()));
        Ok(data.len())
    }
}

/// Listener recording deliveries and key frame requests
#[derive(Default)]
pub struct Recorder {
    pub packets: Mutex<Vec<RtpPacket>>,
    pub key_frames: Mutex<Vec<(SourceGroupInfo, RtpSsrc)>>,
}

impl Recorder {
    pub fn seqs(&self) -> Vec<u16> {
        self.packets.lock().iter().map(|p| p.seq_num()).collect()
    }
}

impl SourceGroupListener for Recorder {
    fn on_rtp(&self, _group: &SourceGroupInfo, packet: RtpPacket) {
        self.packets.lock().push(packet);
    }

    fn on_key_frame_request(&self, group: &SourceGroupInfo, ssrc: RtpSsrc) {
        self.key_frames.lock().push((*group, ssrc));
    }
}

pub fn properties(transport_wide: bool) -> MediaProperties {
    let extensions = if transport_wide {
        format!(
            r#"{{ "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01": {} }}"#,
            TWCC_ID
        )
    } else {
        "{}".to_string()
    };
    let json = format!(
        r#"{{
            "audio": {{ "codecs": [{{ "name": "opus", "pt": {opus} }}] }},
            "video": {{ "codecs": [{{ "name": "VP9", "pt": {vp9}, "rtx": {rtx} }}], "flexfec": {fec} }},
            "extensions": {extensions}
        }}"#,
        opus = OPUS_PT,
        vp9 = VP9_PT,
        rtx = RTX_PT,
        fec = FEC_PT,
        extensions = extensions
    );
    serde_json::from_str(&json).unwrap()
}

pub struct Endpoint {
    pub transport: DtlsIceTransport,
    pub wire: Arc<Wire>,
    pub addr: SocketAddr,
}

impl Endpoint {
    pub fn new(clock: Arc<ManualClock>, addr: &str) -> Self {
        let wire = Arc::new(Wire::default());
        let transport = DtlsIceTransport::with_clock(TransportConfig::default(), wire.clone(), clock);
        Self {
            transport,
            wire,
            addr: addr.parse().unwrap(),
        }
    }

    /// Feed datagrams as if they came from `from`
    pub fn receive_all(&self, from: &Endpoint, datagrams: &[Vec<u8>]) {
        let candidate = RemoteCandidate::new(from.addr, 1);
        for datagram in datagrams {
            self.transport.on_data(&candidate, datagram);
        }
    }
}

pub struct Pair {
    pub clock: Arc<ManualClock>,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Pair {
    pub fn new(transport_wide: bool) -> Self {
        init_test_logging();
        let clock = Arc::new(ManualClock::new(START_MS));
        let a = Endpoint::new(clock.clone(), "192.0.2.1:40000");
        let b = Endpoint::new(clock.clone(), "192.0.2.2:50000");

        let props = properties(transport_wide);
        for (local, remote, local_key, remote_key) in [(&a, &b, &KEY_A, &KEY_B), (&b, &a, &KEY_B, &KEY_A)] {
            local.transport.set_properties(&props);
            local.transport.set_local_crypto_sdes(SUITE, local_key).unwrap();
            local.transport.set_remote_crypto_sdes(SUITE, remote_key).unwrap();
            local.transport.add_remote_candidate(remote.addr, true, 100);
        }

        Self { clock, a, b }
    }

    /// Outgoing video group on `a`, incoming counterpart on `b`
    pub fn video_route(&self, listener: Arc<Recorder>) -> (GroupId, GroupId) {
        let out = self
            .a
            .transport
            .add_outgoing_source_group(OutgoingSourceGroup::new(MediaType::Video, VIDEO_SSRC).with_rtx(VIDEO_RTX_SSRC))
            .unwrap();
        let inc = self
            .b
            .transport
            .add_incoming_source_group(
                IncomingSourceGroup::new(MediaType::Video, VIDEO_SSRC)
                    .with_rtx(VIDEO_RTX_SSRC)
                    .with_fec(VIDEO_FEC_SSRC)
                    .with_listener(listener),
            )
            .unwrap();
        (out, inc)
    }
}

pub fn video_packet(seq: u16, payload: &'static [u8]) -> RtpPacket {
    RtpPacket::new(
        MediaType::Video,
        Codec::Vp9,
        RtpHeader::new(0, seq, 90_000 + seq as u32 * 3000, VIDEO_SSRC),
        Bytes::from_static(payload),
    )
}

/// Decrypting view of what one endpoint sends
pub struct Tap {
    channel: SecureChannel,
    extensions: ExtensionMap,
}

impl Tap {
    /// Tap keyed with the sender's local key
    pub fn new(sender_key: &[u8], transport_wide: bool) -> Self {
        let mut channel = SecureChannel::new(1024);
        channel.configure(Direction::Receive, SUITE, sender_key).unwrap();
        let extensions = properties(transport_wide).negotiated_maps().extensions;
        Self { channel, extensions }
    }

    pub fn rtp(&mut self, datagram: &[u8]) -> ParsedRtp {
        let mut buf = BytesMut::from(datagram);
        let len = self.channel.decrypt_rtp(&mut buf).unwrap();
        parse_rtp(&buf[..len], &self.extensions).unwrap()
    }

    pub fn rtcp(&mut self, datagram: &[u8]) -> RtcpCompoundPacket {
        let mut buf = BytesMut::from(datagram);
        let len = self.channel.decrypt_rtcp(&mut buf).unwrap();
        RtcpCompoundPacket::parse(&buf[..len]).unwrap()
    }
}
