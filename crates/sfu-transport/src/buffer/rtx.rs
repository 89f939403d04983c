//! Shadow copies of sent packets kept for retransmission

use std::collections::BTreeMap;

use tracing::trace;

use crate::packet::RtpPacket;

/// Sent packets of one outgoing group, keyed by extended sequence number
///
/// Each packet's time is its send time in milliseconds and decides when it
/// is evicted.
#[derive(Debug, Default)]
pub struct RtxShadowStore {
    packets: BTreeMap<u32, RtpPacket>,
}

impl RtxShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a copy of a sent packet, replacing any previous one with the
    /// same extended sequence number
    pub fn insert(&mut self, packet: RtpPacket) {
        self.packets.insert(packet.ext_seq_num(), packet);
    }

    pub fn get(&self, ext_seq: u32) -> Option<&RtpPacket> {
        self.packets.get(&ext_seq)
    }

    /// Evict every packet sent more than `retention_ms` before `now_ms`
    ///
    /// Returns how many packets were evicted.
    pub fn prune(&mut self, now_ms: u64, retention_ms: u64) -> usize {
        let before = self.packets.len();
        let cutoff = now_ms.saturating_sub(retention_ms);
        self.packets.retain(|_, packet| packet.time() >= cutoff);

        let evicted = before - self.packets.len();
        if evicted > 0 {
            trace!("Evicted {} shadowed packets older than {}ms", evicted, retention_ms);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}
