//! Handling of received RTCP

use tracing::{debug, trace, warn};

use crate::group::SourceGroup;
use crate::packet::rtcp::{
    PayloadFeedbackMessage, RtcpCompoundPacket, RtcpPacket, RtcpPayloadFeedback, RtcpReportBlock,
    RtcpRtpFeedback, RtcpSenderReport, RtpFeedbackMessage, RTPFB_FMT_TMMBN, RTPFB_FMT_TMMBR,
};
use crate::RtpSsrc;

use super::TransportState;

impl TransportState {
    /// Process every packet of a compound
    ///
    /// A packet that cannot be routed is logged and skipped; the rest of the
    /// compound is still processed.
    pub(super) fn on_rtcp(&mut self, compound: &RtcpCompoundPacket) {
        for packet in &compound.packets {
            match packet {
                RtcpPacket::SenderReport(sr) => self.on_sender_report(sr),
                RtcpPacket::ReceiverReport(rr) => {
                    trace!("RR from {:#010x} with {} blocks", rr.ssrc, rr.report_blocks.len());
                    self.on_report_blocks(&rr.report_blocks);
                }
                RtcpPacket::RtpFeedback(fb) => self.on_rtp_feedback(fb),
                RtcpPacket::PayloadFeedback(fb) => self.on_payload_feedback(fb),
                RtcpPacket::Other { packet_type, .. } => {
                    trace!("Ignoring RTCP packet {:?}", packet_type);
                }
            }
        }
    }

    fn on_sender_report(&mut self, sr: &RtcpSenderReport) {
        let now_ms = self.clock.now_millis();
        match self.incoming.lookup_mut(sr.ssrc).and_then(|group| group.source_mut(sr.ssrc)) {
            Some(source) => {
                source.set_last_sender_report(sr.ntp_timestamp, now_ms);
                trace!(
                    "SR from {:#010x}: {} packets, {} octets",
                    sr.ssrc, sr.sender_packet_count, sr.sender_octet_count
                );
            }
            None => warn!("Sender report for unknown SSRC {:#010x}", sr.ssrc),
        }
        self.on_report_blocks(&sr.report_blocks);
    }

    /// Measure round trip time from blocks about our media sources
    fn on_report_blocks(&mut self, blocks: &[RtcpReportBlock]) {
        let now = self.clock.now_ntp();
        for block in blocks {
            let Some(group) = self.outgoing.lookup_mut(block.ssrc) else {
                trace!("Report block about unknown SSRC {:#010x}", block.ssrc);
                continue;
            };
            if group.media.ssrc != block.ssrc {
                continue;
            }
            if let Some(rtt) = group.rtt.process_report_block(now, block) {
                trace!(
                    "RTT sample {:.1}ms on SSRC {:#010x} (loss {}/256)",
                    rtt, block.ssrc, block.fraction_lost
                );
            }
        }
    }

    fn on_rtp_feedback(&mut self, fb: &RtcpRtpFeedback) {
        let Some(id) = self.outgoing.lookup(fb.media_ssrc) else {
            warn!("RTP feedback for unknown SSRC {:#010x}", fb.media_ssrc);
            return;
        };

        match &fb.message {
            RtpFeedbackMessage::Nack(fields) => {
                for field in fields {
                    for seq in field.sequence_numbers() {
                        if let Err(e) = self.retransmit(id, seq) {
                            debug!("Retransmission of seq {} failed: {}", seq, e);
                        }
                    }
                }
            }
            RtpFeedbackMessage::TransportWide(feedback) => {
                debug!(
                    "Transport-wide feedback #{} covering {} packets, {} lost",
                    feedback.feedback_packet_count,
                    feedback.packets.len(),
                    feedback.lost().len()
                );
            }
            RtpFeedbackMessage::Other { fmt, .. } if *fmt == RTPFB_FMT_TMMBR || *fmt == RTPFB_FMT_TMMBN => {
                debug!("Ignoring TMMBR/TMMBN for SSRC {:#010x}", fb.media_ssrc);
            }
            RtpFeedbackMessage::Other { fmt, .. } => {
                debug!("Unhandled RTP feedback format {}", fmt);
            }
        }
    }

    fn on_payload_feedback(&mut self, fb: &RtcpPayloadFeedback) {
        match &fb.message {
            PayloadFeedbackMessage::PictureLoss => self.request_key_frame(fb.media_ssrc),
            PayloadFeedbackMessage::FullIntraRequest(entries) => {
                if entries.is_empty() {
                    self.request_key_frame(fb.media_ssrc);
                }
                for entry in entries {
                    self.request_key_frame(entry.ssrc);
                }
            }
            PayloadFeedbackMessage::ApplicationLayer(_) => match fb.remb() {
                Some(remb) => debug!("REMB estimate {} bps for SSRCs {:?}", remb.bitrate, remb.ssrcs),
                None => debug!("Unknown application layer feedback from {:#010x}", fb.sender_ssrc),
            },
            PayloadFeedbackMessage::Other { fmt, .. } => {
                debug!("Unhandled payload feedback format {} for SSRC {:#010x}", fmt, fb.media_ssrc);
            }
        }
    }

    fn request_key_frame(&self, ssrc: RtpSsrc) {
        let Some(group) = self.outgoing.lookup(ssrc).and_then(|id| self.outgoing.get(id)) else {
            warn!("Key frame request for unknown SSRC {:#010x}", ssrc);
            return;
        };

        debug!("Key frame requested for SSRC {:#010x}", ssrc);
        match group.listener() {
            Some(listener) => listener.on_key_frame_request(&group.info(), ssrc),
            None => debug!("No listener for key frame request on SSRC {:#010x}", ssrc),
        }
    }
}
