//! Outbound media, RTCP and retransmissions

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::config::{Codec, MediaType, NegotiatedMaps};
use crate::error::Error;
use crate::packet::rtcp::{RtcpCompoundPacket, RtcpPacket, RtcpPayloadFeedback};
use crate::packet::{ExtensionKind, RtpPacket};
use crate::registry::GroupId;
use crate::seq::WrapExtender;
use crate::{Result, RtpSequenceNumber, RtpSsrc};

use super::{transmit, TransportState};

impl TransportState {
    fn ensure_can_send(&self) -> Result<()> {
        if self.candidates.active().is_none() {
            return Err(Error::State("No active candidate yet".to_string()));
        }
        if !self.channel.can_send() {
            return Err(Error::NotReady("No send SRTP session".to_string()));
        }
        Ok(())
    }

    /// Stamp a transport-wide sequence number if the extension was negotiated
    fn stamp_transport_seq(&mut self, packet: &mut RtpPacket) {
        if self.maps.extensions.id_for(ExtensionKind::TransportWideCc).is_some() {
            packet.extension.transport_seq_num = Some(self.next_transport_seq());
        }
    }

    pub(super) fn send_rtp(&mut self, mut packet: RtpPacket) -> Result<()> {
        self.ensure_can_send()?;
        let now_ms = self.clock.now_millis();

        let ssrc = packet.ssrc();
        let id = self
            .outgoing
            .lookup(ssrc)
            .ok_or_else(|| Error::Lookup(format!("No outgoing group for SSRC {:#010x}", ssrc)))?;
        let payload_type = self
            .maps
            .rtp_map
            .type_for_codec(packet.codec)
            .ok_or_else(|| Error::Lookup(format!("No payload type negotiated for {:?}", packet.codec)))?;

        let media_type = self
            .outgoing
            .get(id)
            .map(|group| group.media_type)
            .ok_or_else(|| Error::Lookup(format!("Stale group for SSRC {:#010x}", ssrc)))?;
        if media_type == MediaType::Video {
            self.stamp_transport_seq(&mut packet);
        }

        let Some(group) = self.outgoing.get_mut(id) else {
            return Err(Error::Lookup(format!("Stale group for SSRC {:#010x}", ssrc)));
        };

        let cycles = group.media.extend_seq(packet.seq_num());
        packet.set_seq_cycles(cycles);
        packet.media_type = media_type;
        packet.header.ssrc = group.media.ssrc;
        packet.header.payload_type = payload_type;
        packet.header.padding = false;

        let timestamp = packet.header.timestamp;
        let mut buf = packet.serialize(&self.maps.extensions, self.config.mtu)?;

        if group.has_rtx() {
            packet.set_time(now_ms);
            group.packets.insert(packet);

            let retention = self.config.rtx_retention_ms(group.rtt.rtt_ms());
            group.packets.prune(now_ms, retention);
        }

        self.send_protected_rtp(id, &mut buf, timestamp, now_ms, false)
    }

    /// Encrypt and send a serialized packet, accounting it on the media or
    /// RTX source of the group
    fn send_protected_rtp(
        &mut self,
        id: GroupId,
        buf: &mut BytesMut,
        timestamp: u32,
        now_ms: u64,
        rtx: bool,
    ) -> Result<()> {
        let len = self.channel.encrypt_rtp(buf)?;
        transmit(self.sender.as_ref(), &self.candidates, &buf[..len])?;

        if let Some(group) = self.outgoing.get_mut(id) {
            let source = if rtx { &mut group.rtx } else { &mut group.media };
            source.on_sent(timestamp, len, now_ms);
        }
        Ok(())
    }

    /// Resend a shadowed packet on the RTX stream of its group
    ///
    /// Only the current sequence cycle of the media source is searched.
    /// Returns whether the packet was found and sent.
    pub(super) fn retransmit(&mut self, id: GroupId, seq: RtpSequenceNumber) -> Result<bool> {
        let now_ms = self.clock.now_millis();

        let Some(group) = self.outgoing.get_mut(id) else {
            return Err(Error::Lookup("Retransmission on unknown group".to_string()));
        };
        if !group.has_rtx() {
            debug!("No RTX stream on SSRC {:#010x}, cannot resend seq {}", group.media.ssrc, seq);
            return Ok(false);
        }

        let retention = self.config.rtx_retention_ms(group.rtt.rtt_ms());
        group.packets.prune(now_ms, retention);

        let ext_seq = WrapExtender::<u16, u32>::extended_for(group.media.cycles() as u32, seq);
        let Some(original) = group.packets.get(ext_seq) else {
            debug!(
                "Packet seq {} (ext {}) not available for retransmission on SSRC {:#010x}",
                seq, ext_seq, group.media.ssrc
            );
            return Ok(false);
        };

        let mut packet = original.clone();
        let rtx_type = rtx_payload_type(&self.maps, packet.codec, group.rtx.ssrc)?;
        let (rtx_seq, rtx_cycles) = group.rtx.next_seq_num();
        packet.header.ssrc = group.rtx.ssrc;
        packet.header.sequence_number = rtx_seq;
        packet.set_seq_cycles(rtx_cycles);
        packet.header.payload_type = rtx_type;
        packet.header.padding = false;
        let media_type = group.media_type;

        if media_type == MediaType::Video {
            self.stamp_transport_seq(&mut packet);
        } else {
            packet.extension.transport_seq_num = None;
        }

        let mut buf = packet.serialize_rtx(seq, &self.maps.extensions, self.config.mtu)?;
        self.send_protected_rtp(id, &mut buf, packet.header.timestamp, now_ms, true)?;

        trace!("Retransmitted seq {} as RTX seq {} on SSRC {:#010x}", seq, rtx_seq, packet.ssrc());
        Ok(true)
    }

    /// Protect and send an RTCP compound, returning the bytes sent
    pub(super) fn send_rtcp(&mut self, compound: &RtcpCompoundPacket) -> Result<usize> {
        self.ensure_can_send()?;

        let mut buf = compound.serialize(self.config.mtu)?;
        let len = self.channel.encrypt_rtcp(&mut buf)?;
        transmit(self.sender.as_ref(), &self.candidates, &buf[..len])
    }

    pub(super) fn send_pli(&mut self, ssrc: RtpSsrc) -> Result<()> {
        let sender_ssrc = self.first_outgoing_ssrc();
        let group = self
            .incoming
            .lookup_mut(ssrc)
            .ok_or_else(|| Error::Lookup(format!("No incoming group for SSRC {:#010x}", ssrc)))?;

        group.reset_packets();
        debug!("Requesting key frame on SSRC {:#010x}", ssrc);

        let mut compound = RtcpCompoundPacket::new();
        compound.push(RtcpPacket::PayloadFeedback(RtcpPayloadFeedback::pli(sender_ssrc, ssrc)));
        self.send_rtcp(&compound)?;
        Ok(())
    }
}

/// RTX payload type associated with `codec`
fn rtx_payload_type(maps: &NegotiatedMaps, codec: Codec, rtx_ssrc: RtpSsrc) -> Result<u8> {
    maps.apt_map
        .rtx_type_for_codec(codec)
        .or_else(|| maps.rtp_map.type_for_codec(Codec::Rtx))
        .ok_or_else(|| Error::Lookup(format!("No RTX payload type for {:?} on SSRC {:#010x}", codec, rtx_ssrc)))
}
