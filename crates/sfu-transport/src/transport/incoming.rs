//! Inbound datagram handling

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::config::{Codec, MediaType};
use crate::dtls::is_dtls;
use crate::error::Error;
use crate::group::SourceGroup;
use crate::packet::rtcp::{
    is_rtcp, RtcpCompoundPacket, RtcpPacket, RtcpReceiverReport, RtcpRtpFeedback, TransportWideFeedback,
};
use crate::packet::{parse_rtp, RtpPacket};
use crate::registry::GroupId;
use crate::seq::WrapExtender;
use crate::{Result, RtpSsrc};

use super::{RemoteCandidate, TransportState};

/// Most NACK fields sent in one feedback packet
const MAX_NACK_FIELDS: usize = 128;

/// Longest run of missing transport-wide sequence numbers reported as lost
const MAX_TRANSPORT_WIDE_GAP: u32 = 1024;

/// Size of the original sequence number prefix of an RTX payload
const RTX_HEADER_SIZE: usize = 2;

impl TransportState {
    pub(super) fn on_data(&mut self, candidate: &RemoteCandidate, data: &[u8]) -> Result<()> {
        if is_dtls(data) {
            self.on_dtls(candidate, data)
        } else if is_rtcp(data) {
            self.on_rtcp_datagram(data)
        } else {
            self.on_rtp_datagram(data)
        }
    }

    fn on_dtls(&mut self, candidate: &RemoteCandidate, data: &[u8]) -> Result<()> {
        let dtls = self
            .dtls
            .as_mut()
            .ok_or_else(|| Error::State("DTLS record without a handshake engine".to_string()))?;

        trace!("DTLS record of {} bytes from {}", data.len(), candidate.addr);
        dtls.write(data);

        self.flush_handshake(Some(candidate));
        self.poll_handshake();
        Ok(())
    }

    fn on_rtcp_datagram(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = BytesMut::from(data);
        let len = self.channel.decrypt_rtcp(&mut buf)?;

        let compound = RtcpCompoundPacket::parse(&buf[..len])?;
        self.on_rtcp(&compound);
        Ok(())
    }

    fn on_rtp_datagram(&mut self, data: &[u8]) -> Result<()> {
        let now_us = self.clock.now_micros();
        let now_ms = now_us / 1000;

        let mut buf = BytesMut::from(data);
        let len = self.channel.decrypt_rtp(&mut buf)?;
        let parsed = parse_rtp(&buf[..len], &self.maps.extensions)?;

        let ssrc = parsed.header.ssrc;
        let payload_type = parsed.header.payload_type;

        let id = self
            .incoming
            .lookup(ssrc)
            .ok_or_else(|| Error::Lookup(format!("No incoming group for SSRC {:#010x}", ssrc)))?;
        let codec = self
            .maps
            .rtp_map
            .codec_for_type(payload_type)
            .ok_or_else(|| Error::Lookup(format!("Unknown payload type {} on SSRC {:#010x}", payload_type, ssrc)))?;

        let Some(group) = self.incoming.get_mut(id) else {
            return Err(Error::Lookup(format!("Stale group for SSRC {:#010x}", ssrc)));
        };
        let media_type = group.media_type;

        let mut packet = RtpPacket::from_parsed(media_type, codec, parsed);
        packet.set_time(now_ms);

        let source = group
            .source_mut(ssrc)
            .ok_or_else(|| Error::Lookup(format!("SSRC {:#010x} has no role in its group", ssrc)))?;
        let cycles = source.update(packet.seq_num(), len);
        packet.set_seq_cycles(cycles);

        if media_type == MediaType::Video {
            if let Some(transport_seq) = packet.transport_seq_num() {
                self.send_transport_wide_feedback(ssrc, transport_seq, now_us);
            }
        }

        let Some(packet) = self.resolve_role(id, packet)? else {
            return Ok(());
        };

        let Some(group) = self.incoming.get_mut(id) else {
            return Ok(());
        };
        let lost = group.losts.add(packet.ext_seq_num());
        if lost > 0 && media_type == MediaType::Video {
            debug!(
                "Detected {} lost packets before seq {} on SSRC {:#010x}",
                lost,
                packet.seq_num(),
                packet.ssrc()
            );
            self.send_nack(id, now_ms);
        }

        self.deliver(id, packet, now_ms);
        Ok(())
    }

    /// Turn an RTX packet back into the media packet it carries and consume
    /// FEC packets
    ///
    /// Returns `None` when the packet stops here.
    fn resolve_role(&mut self, id: GroupId, mut packet: RtpPacket) -> Result<Option<RtpPacket>> {
        let Some(group) = self.incoming.get_mut(id) else {
            return Ok(None);
        };
        let ssrc = packet.ssrc();

        if ssrc == group.media.ssrc {
            return Ok(Some(packet));
        }

        if ssrc == group.fec.ssrc {
            if packet.codec != Codec::FlexFec {
                return Err(Error::ProtocolParse(format!(
                    "FEC SSRC {:#010x} carries non FEC payload type {}",
                    ssrc, packet.header.payload_type
                )));
            }
            trace!("Discarding FEC packet seq {} on SSRC {:#010x}", packet.seq_num(), ssrc);
            return Ok(None);
        }

        if packet.codec != Codec::Rtx {
            return Err(Error::ProtocolParse(format!(
                "RTX SSRC {:#010x} carries non RTX payload type {}",
                ssrc, packet.header.payload_type
            )));
        }

        let rtx_type = packet.header.payload_type;
        let codec = self
            .maps
            .apt_map
            .codec_for_type(rtx_type)
            .ok_or_else(|| Error::Lookup(format!("No associated codec for RTX payload type {}", rtx_type)))?;

        let prefix = packet.payload.get(..RTX_HEADER_SIZE).ok_or(Error::BufferTooSmall {
            required: RTX_HEADER_SIZE,
            available: packet.payload.len(),
        })?;
        let original_seq = u16::from_be_bytes([prefix[0], prefix[1]]);
        packet.skip_payload(RTX_HEADER_SIZE)?;

        let cycles = group.media.cycles();
        let ext_seq = WrapExtender::<u16, u32>::extended_for(cycles as u32, original_seq);
        if ext_seq > group.media.ext_seq_num() {
            debug!(
                "Dropping RTX packet for future seq {} (highest {}) on SSRC {:#010x}",
                ext_seq,
                group.media.ext_seq_num(),
                group.media.ssrc
            );
            return Ok(None);
        }

        packet.header.ssrc = group.media.ssrc;
        packet.header.sequence_number = original_seq;
        packet.set_seq_cycles(cycles);
        packet.codec = codec;
        if let Some(media_pt) = self.maps.rtp_map.type_for_codec(codec) {
            packet.header.payload_type = media_pt;
        }

        trace!("Recovered seq {} from RTX on SSRC {:#010x}", original_seq, ssrc);
        Ok(Some(packet))
    }

    /// Hand every packet the reorder buffer can release to the listener
    fn deliver(&mut self, id: GroupId, packet: RtpPacket, now_ms: u64) {
        let Some(group) = self.incoming.get_mut(id) else {
            return;
        };
        let Some(listener) = group.listener() else {
            trace!("No listener on SSRC {:#010x}, dropping seq {}", group.media.ssrc, packet.seq_num());
            return;
        };

        group.packets.add(packet);
        let info = group.info();
        for ready in group.packets.ordered(now_ms) {
            listener.on_rtp(&info, ready);
        }
    }

    /// Report every missing packet of a group together with a report about
    /// its media source
    fn send_nack(&mut self, id: GroupId, now_ms: u64) {
        let Some(group) = self.incoming.get_mut(id) else {
            return;
        };
        let media_ssrc = group.media.ssrc;

        let mut fields = group.losts.nacks();
        fields.truncate(MAX_NACK_FIELDS);
        if fields.is_empty() {
            return;
        }
        let block = group.media.report_block(now_ms);

        let report = match self.outgoing.first() {
            Some(outgoing) => {
                let mut sr = outgoing.media.sender_report(self.clock.now_ntp());
                sr.add_report_block(block);
                RtcpPacket::SenderReport(sr)
            }
            None => {
                let mut rr = RtcpReceiverReport::new(1);
                rr.add_report_block(block);
                RtcpPacket::ReceiverReport(rr)
            }
        };

        let mut compound = RtcpCompoundPacket::new();
        compound.push(report);
        compound.push(RtcpPacket::RtpFeedback(RtcpRtpFeedback::nack(
            self.first_outgoing_ssrc(),
            media_ssrc,
            fields,
        )));

        if let Err(e) = self.send_rtcp(&compound) {
            debug!("Could not send NACK for SSRC {:#010x}: {}", media_ssrc, e);
        }
    }

    /// Acknowledge one transport-wide sequence number, reporting every one
    /// skipped since the last acknowledgement as lost
    fn send_transport_wide_feedback(&mut self, media_ssrc: RtpSsrc, transport_seq: u16, now_us: u64) {
        let cycles = self.transport_wide.extend(transport_seq);
        let ext_seq = WrapExtender::<u16, u32>::extended_for(cycles, transport_seq);

        let mut feedback = TransportWideFeedback::new(self.feedback_packet_count);
        self.feedback_packet_count = self.feedback_packet_count.wrapping_add(1);

        match self.last_feedback_seq {
            Some(last) if ext_seq > last => {
                let first_missing = (last + 1).max(ext_seq.saturating_sub(MAX_TRANSPORT_WIDE_GAP));
                for seq in first_missing..ext_seq {
                    feedback.add_packet(seq, 0);
                }
                self.last_feedback_seq = Some(ext_seq);
            }
            Some(_) => {}
            None => self.last_feedback_seq = Some(ext_seq),
        }
        feedback.add_packet(ext_seq, now_us.max(1));

        let mut compound = RtcpCompoundPacket::new();
        compound.push(RtcpPacket::RtpFeedback(RtcpRtpFeedback::transport_wide(
            self.first_outgoing_ssrc(),
            media_ssrc,
            feedback,
        )));

        if let Err(e) = self.send_rtcp(&compound) {
            debug!("Could not send transport-wide feedback for seq {}: {}", ext_seq, e);
        }
    }
}
