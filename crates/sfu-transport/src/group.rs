//! Source groups
//!
//! A source group is one logical media stream made of up to three RTP
//! streams, each with its own SSRC: the media itself, its retransmissions
//! (RTX, RFC 4588) and its forward error correction (FEC). An SSRC of zero
//! means the role is absent.

use std::fmt;
use std::sync::Arc;

use crate::buffer::{ReorderBuffer, RtxShadowStore};
use crate::config::{MediaType, TransportConfig};
use crate::packet::rtcp::{NtpTimestamp, RtcpReportBlock, RtcpSenderReport};
use crate::packet::RtpPacket;
use crate::seq::{rtp_sequence_from_previous_cycle, rtp_sequence_wrapped, WrapExtender};
use crate::stats::{LostPackets, RttEstimator};
use crate::time::millis_to_ntp_short;
use crate::{RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Identity of a source group as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceGroupInfo {
    pub media_type: MediaType,
    pub media_ssrc: RtpSsrc,
    pub rtx_ssrc: RtpSsrc,
    pub fec_ssrc: RtpSsrc,
}

/// Receiver of packets and key frame requests for a source group
///
/// Callbacks run synchronously while the transport lock is held. They must
/// not block and must not call back into the transport.
pub trait SourceGroupListener: Send + Sync {
    /// An in-order media packet of an incoming group
    fn on_rtp(&self, group: &SourceGroupInfo, packet: RtpPacket) {
        let _ = (group, packet);
    }

    /// The remote asked for a key frame on an outgoing group
    fn on_key_frame_request(&self, group: &SourceGroupInfo, ssrc: RtpSsrc) {
        let _ = (group, ssrc);
    }
}

/// Common view of incoming and outgoing groups used by the registry
pub trait SourceGroup {
    fn info(&self) -> SourceGroupInfo;

    /// Every non-zero SSRC the group owns
    fn ssrcs(&self) -> Vec<RtpSsrc> {
        let info = self.info();
        [info.media_ssrc, info.rtx_ssrc, info.fec_ssrc]
            .into_iter()
            .filter(|ssrc| *ssrc != 0)
            .collect()
    }
}

/// Receive state of one SSRC
#[derive(Debug, Clone, Default)]
pub struct IncomingSource {
    /// SSRC, zero if the role is absent
    pub ssrc: RtpSsrc,

    /// Highest extended sequence number received
    ext_seq: u32,

    /// Sequence number wraps observed
    cycles: u16,

    /// Extended sequence number of the first packet
    base_ext_seq: Option<u32>,

    /// Packets received
    num_packets: u64,

    /// Bytes received
    total_bytes: u64,

    /// Packets received since the last report block
    packets_since_report: u32,

    /// Lowest extended sequence number received since the last report block
    min_ext_seq_since_report: Option<u32>,

    /// Middle 32 bits of the NTP time of the last sender report
    last_sr_ntp: u32,

    /// Arrival time of the last sender report in milliseconds
    last_sr_time: u64,
}

impl IncomingSource {
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self { ssrc, ..Default::default() }
    }

    /// Account a received packet and return its sequence cycle
    ///
    /// The high-water mark only moves forward. A straggler from before the
    /// last wrap gets the previous cycle.
    pub fn update(&mut self, seq: RtpSequenceNumber, size: usize) -> u16 {
        let initialized = self.num_packets > 0;
        if initialized && rtp_sequence_wrapped(self.ext_seq, seq) {
            self.cycles = self.cycles.wrapping_add(1);
        }

        let cycles = if initialized && rtp_sequence_from_previous_cycle(self.ext_seq, seq) {
            self.cycles.wrapping_sub(1)
        } else {
            self.cycles
        };
        let ext_seq = (cycles as u32) << 16 | seq as u32;
        if !initialized || ext_seq > self.ext_seq {
            self.ext_seq = ext_seq;
        }
        if self.base_ext_seq.map_or(true, |base| ext_seq < base) {
            self.base_ext_seq = Some(ext_seq);
        }
        if self.min_ext_seq_since_report.map_or(true, |min| ext_seq < min) {
            self.min_ext_seq_since_report = Some(ext_seq);
        }

        self.num_packets += 1;
        self.total_bytes += size as u64;
        self.packets_since_report = self.packets_since_report.saturating_add(1);

        cycles
    }

    pub fn ext_seq_num(&self) -> u32 {
        self.ext_seq
    }

    pub fn cycles(&self) -> u16 {
        self.cycles
    }

    pub fn num_packets(&self) -> u64 {
        self.num_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn last_sr_ntp(&self) -> u32 {
        self.last_sr_ntp
    }

    /// Remember a sender report received at `now_ms`
    pub fn set_last_sender_report(&mut self, ntp: NtpTimestamp, now_ms: u64) {
        self.last_sr_ntp = ntp.to_u32();
        self.last_sr_time = now_ms;
    }

    /// Build a report block and restart the since-last-report counters
    pub fn report_block(&mut self, now_ms: u64) -> RtcpReportBlock {
        let mut block = RtcpReportBlock::new(self.ssrc);
        block.highest_seq = self.ext_seq;

        if let Some(min) = self.min_ext_seq_since_report {
            let expected = self.ext_seq.saturating_sub(min) + 1;
            let lost = expected.saturating_sub(self.packets_since_report);
            block.fraction_lost = RtcpReportBlock::fraction(expected, lost);
        }

        if let Some(base) = self.base_ext_seq {
            let expected = (self.ext_seq - base) as u64 + 1;
            block.cumulative_lost = expected.saturating_sub(self.num_packets).min(0x00FF_FFFF) as u32;
        }

        if self.last_sr_ntp != 0 {
            block.last_sr = self.last_sr_ntp;
            block.delay_since_last_sr = millis_to_ntp_short(now_ms.saturating_sub(self.last_sr_time));
        }

        self.packets_since_report = 0;
        self.min_ext_seq_since_report = None;
        block
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.ssrc);
    }
}

/// Receive side of a logical stream
pub struct IncomingSourceGroup {
    pub media_type: MediaType,
    pub media: IncomingSource,
    pub rtx: IncomingSource,
    pub fec: IncomingSource,

    /// Losses on the media stream
    pub losts: LostPackets,

    /// Media packets awaiting in-order delivery
    pub packets: ReorderBuffer,

    listener: Option<Arc<dyn SourceGroupListener>>,
}

impl IncomingSourceGroup {
    pub fn new(media_type: MediaType, media_ssrc: RtpSsrc) -> Self {
        let config = TransportConfig::default();
        Self {
            media_type,
            media: IncomingSource::new(media_ssrc),
            rtx: IncomingSource::new(0),
            fec: IncomingSource::new(0),
            losts: LostPackets::new(config.loss_window),
            packets: ReorderBuffer::new(config.reorder_max_wait_ms, config.reorder_capacity),
            listener: None,
        }
    }

    pub fn with_rtx(mut self, ssrc: RtpSsrc) -> Self {
        self.rtx = IncomingSource::new(ssrc);
        self
    }

    pub fn with_fec(mut self, ssrc: RtpSsrc) -> Self {
        self.fec = IncomingSource::new(ssrc);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SourceGroupListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Size the loss tracker and reorder buffer from transport tuning
    pub fn apply_config(&mut self, config: &TransportConfig) {
        self.losts = LostPackets::new(config.loss_window);
        self.packets = ReorderBuffer::new(config.reorder_max_wait_ms, config.reorder_capacity);
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn SourceGroupListener>>) {
        self.listener = listener;
    }

    pub fn listener(&self) -> Option<Arc<dyn SourceGroupListener>> {
        self.listener.clone()
    }

    /// The source owning `ssrc`, if any
    pub fn source_mut(&mut self, ssrc: RtpSsrc) -> Option<&mut IncomingSource> {
        if ssrc == 0 {
            None
        } else if self.media.ssrc == ssrc {
            Some(&mut self.media)
        } else if self.rtx.ssrc == ssrc {
            Some(&mut self.rtx)
        } else if self.fec.ssrc == ssrc {
            Some(&mut self.fec)
        } else {
            None
        }
    }

    /// Forget buffered packets and losses, e.g. before asking for a key frame
    pub fn reset_packets(&mut self) {
        self.packets.reset();
        self.losts.reset();
    }
}

impl SourceGroup for IncomingSourceGroup {
    fn info(&self) -> SourceGroupInfo {
        SourceGroupInfo {
            media_type: self.media_type,
            media_ssrc: self.media.ssrc,
            rtx_ssrc: self.rtx.ssrc,
            fec_ssrc: self.fec.ssrc,
        }
    }
}

impl fmt::Debug for IncomingSourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingSourceGroup")
            .field("info", &self.info())
            .field("ext_seq", &self.media.ext_seq_num())
            .field("lost", &self.losts.total())
            .field("buffered", &self.packets.len())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

/// Send state of one SSRC
#[derive(Debug, Clone, Default)]
pub struct OutgoingSource {
    /// SSRC, zero if the role is absent
    pub ssrc: RtpSsrc,

    /// Extends the sequence numbers of sent packets
    seq: WrapExtender<u16, u32>,

    /// Next sequence number for packets this source generates itself
    next_seq: RtpSequenceNumber,

    /// Packets sent
    num_packets: u64,

    /// Bytes sent
    total_bytes: u64,

    /// RTP timestamp of the last packet sent
    last_timestamp: RtpTimestamp,

    /// Send time of the last packet in milliseconds
    last_time: u64,
}

impl OutgoingSource {
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self { ssrc, ..Default::default() }
    }

    /// Start generated sequence numbers at a random point (RFC 3550 Section 5.1)
    pub fn with_random_seq(mut self) -> Self {
        self.next_seq = rand::random();
        self
    }

    /// Cycle a sequence number of the application's stream belongs to
    pub fn extend_seq(&mut self, seq: RtpSequenceNumber) -> u16 {
        self.seq.extend(seq) as u16
    }

    /// Take the next generated sequence number and its cycle
    pub fn next_seq_num(&mut self) -> (RtpSequenceNumber, u16) {
        let seq = self.next_seq;
        self.next_seq = seq.wrapping_add(1);
        (seq, self.extend_seq(seq))
    }

    /// Cycles of the highest sequence number sent
    pub fn cycles(&self) -> u16 {
        self.seq.cycles() as u16
    }

    pub fn ext_seq_num(&self) -> u32 {
        self.seq.extended()
    }

    /// Account a sent packet
    pub fn on_sent(&mut self, timestamp: RtpTimestamp, size: usize, now_ms: u64) {
        self.num_packets += 1;
        self.total_bytes += size as u64;
        self.last_timestamp = timestamp;
        self.last_time = now_ms;
    }

    pub fn num_packets(&self) -> u64 {
        self.num_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Sender report describing this source at `now`
    pub fn sender_report(&self, now: NtpTimestamp) -> RtcpSenderReport {
        let mut sr = RtcpSenderReport::new(self.ssrc);
        sr.ntp_timestamp = now;
        sr.rtp_timestamp = self.last_timestamp;
        sr.sender_packet_count = self.num_packets as u32;
        sr.sender_octet_count = self.total_bytes as u32;
        sr
    }
}

/// Send side of a logical stream
pub struct OutgoingSourceGroup {
    pub media_type: MediaType,
    pub media: OutgoingSource,
    pub rtx: OutgoingSource,
    pub fec: OutgoingSource,

    /// Sent media packets kept for retransmission
    pub packets: RtxShadowStore,

    /// Round trip time measured from report blocks about the media stream
    pub rtt: RttEstimator,

    listener: Option<Arc<dyn SourceGroupListener>>,
}

impl OutgoingSourceGroup {
    pub fn new(media_type: MediaType, media_ssrc: RtpSsrc) -> Self {
        Self {
            media_type,
            media: OutgoingSource::new(media_ssrc),
            rtx: OutgoingSource::new(0),
            fec: OutgoingSource::new(0),
            packets: RtxShadowStore::new(),
            rtt: RttEstimator::new(),
            listener: None,
        }
    }

    pub fn with_rtx(mut self, ssrc: RtpSsrc) -> Self {
        self.rtx = OutgoingSource::new(ssrc).with_random_seq();
        self
    }

    pub fn with_fec(mut self, ssrc: RtpSsrc) -> Self {
        self.fec = OutgoingSource::new(ssrc);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SourceGroupListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn SourceGroupListener>>) {
        self.listener = listener;
    }

    pub fn listener(&self) -> Option<Arc<dyn SourceGroupListener>> {
        self.listener.clone()
    }

    /// Whether sent packets are kept for retransmission
    pub fn has_rtx(&self) -> bool {
        self.rtx.ssrc != 0
    }
}

impl SourceGroup for OutgoingSourceGroup {
    fn info(&self) -> SourceGroupInfo {
        SourceGroupInfo {
            media_type: self.media_type,
            media_ssrc: self.media.ssrc,
            rtx_ssrc: self.rtx.ssrc,
            fec_ssrc: self.fec.ssrc,
        }
    }
}

impl fmt::Debug for OutgoingSourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingSourceGroup")
            .field("info", &self.info())
            .field("sent", &self.media.num_packets())
            .field("shadowed", &self.packets.len())
            .field("rtt_ms", &self.rtt.rtt_ms())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
