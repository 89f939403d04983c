//! Reorder buffer for incoming RTP packets
//!
//! Packets are held by extended sequence number and released strictly in
//! order. A gap is waited on for at most `max_wait_ms` (measured from the
//! arrival of the oldest held packet) or until the buffer exceeds its
//! capacity, after which the missing packets are skipped.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::packet::RtpPacket;

/// Counters for a reorder buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderBufferStats {
    /// Packets offered to the buffer
    pub packets_received: u64,

    /// Packets released in order
    pub packets_delivered: u64,

    /// Packets dropped because their turn had already passed
    pub packets_too_late: u64,

    /// Packets dropped because they were already held
    pub duplicates: u64,

    /// Gaps skipped after waiting or overflowing
    pub discontinuities: u64,
}

/// Buffer releasing packets in extended sequence order
#[derive(Debug)]
pub struct ReorderBuffer {
    /// Packets stored by extended sequence number
    packets: BTreeMap<u32, RtpPacket>,

    /// Next extended sequence number to release
    next: Option<u32>,

    /// Longest wait for a gap to fill, in milliseconds
    max_wait_ms: u64,

    /// Packets held before gaps are skipped regardless of wait
    capacity: usize,

    stats: ReorderBufferStats,
}

impl ReorderBuffer {
    pub fn new(max_wait_ms: u64, capacity: usize) -> Self {
        Self {
            packets: BTreeMap::new(),
            next: None,
            max_wait_ms,
            capacity: capacity.max(1),
            stats: ReorderBufferStats::default(),
        }
    }

    /// Hold a packet until its turn
    ///
    /// The packet's time must be its arrival time in milliseconds. Returns
    /// false if the packet was dropped.
    pub fn add(&mut self, packet: RtpPacket) -> bool {
        let ext_seq = packet.ext_seq_num();
        self.stats.packets_received += 1;

        if let Some(next) = self.next {
            if ext_seq < next {
                trace!("Packet too late: ext_seq={}, next={}", ext_seq, next);
                self.stats.packets_too_late += 1;
                return false;
            }
        }

        if self.packets.contains_key(&ext_seq) {
            trace!("Duplicate packet with ext_seq={}", ext_seq);
            self.stats.duplicates += 1;
            return false;
        }

        self.packets.insert(ext_seq, packet);
        true
    }

    /// Release the next packet if it is in order, or if the gap before it
    /// has been waited on long enough
    pub fn pop_ordered(&mut self, now_ms: u64) -> Option<RtpPacket> {
        let (&first, packet) = self.packets.first_key_value()?;

        let ready = match self.next {
            None => true,
            Some(next) if first == next => true,
            Some(next) => {
                let waited = now_ms.saturating_sub(packet.time());
                if waited >= self.max_wait_ms || self.packets.len() > self.capacity {
                    debug!(
                        "Skipping {} missing packets before ext_seq={} after {}ms",
                        first - next,
                        first,
                        waited
                    );
                    self.stats.discontinuities += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !ready {
            return None;
        }

        let packet = self.packets.remove(&first)?;
        self.next = Some(first.wrapping_add(1));
        self.stats.packets_delivered += 1;
        Some(packet)
    }

    /// Iterate over every packet ready at `now_ms`
    pub fn ordered(&mut self, now_ms: u64) -> Ordered<'_> {
        Ordered { buffer: self, now_ms }
    }

    /// Number of packets held
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn stats(&self) -> &ReorderBufferStats {
        &self.stats
    }

    /// Drop every held packet and restart ordering at the next arrival
    pub fn reset(&mut self) {
        self.packets.clear();
        self.next = None;
    }
}

/// Iterator draining the packets a [`ReorderBuffer`] can release
pub struct Ordered<'a> {
    buffer: &'a mut ReorderBuffer,
    now_ms: u64,
}

impl Iterator for Ordered<'_> {
    type Item = RtpPacket;

    fn next(&mut self) -> Option<RtpPacket> {
        self.buffer.pop_ordered(self.now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::config::{Codec, MediaType};
    use crate::packet::RtpHeader;

    fn packet(ext_seq: u32, time: u64) -> RtpPacket {
        let mut packet = RtpPacket::new(
            MediaType::Video,
            Codec::Vp8,
            RtpHeader::new(96, 0, 0, 0x1111),
            Bytes::from_static(b"frame"),
        );
        packet.set_ext_seq_num(ext_seq);
        packet.set_time(time);
        packet
    }

    fn drain(buffer: &mut ReorderBuffer, now: u64) -> Vec<u32> {
        buffer.ordered(now).map(|p| p.ext_seq_num()).collect()
    }

    #[test]
    fn test_in_order_release() {
        let mut buffer = ReorderBuffer::new(100, 64);
        for seq in 10..13 {
            assert!(buffer.add(packet(seq, 0)));
            assert_eq!(drain(&mut buffer, 0), vec![seq]);
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().packets_delivered, 3);
    }

    #[test]
    fn test_gap_filled_before_timeout() {
        let mut buffer = ReorderBuffer::new(100, 64);
        buffer.add(packet(10, 0));
        assert_eq!(drain(&mut buffer, 0), vec![10]);

        buffer.add(packet(12, 5));
        buffer.add(packet(13, 6));
        assert!(drain(&mut buffer, 50).is_empty());

        buffer.add(packet(11, 60));
        assert_eq!(drain(&mut buffer, 60), vec![11, 12, 13]);
        assert_eq!(buffer.stats().discontinuities, 0);
    }

    #[test]
    fn test_gap_skipped_after_timeout() {
        let mut buffer = ReorderBuffer::new(100, 64);
        buffer.add(packet(1, 0));
        drain(&mut buffer, 0);

        buffer.add(packet(3, 10));
        buffer.add(packet(4, 20));
        assert!(drain(&mut buffer, 109).is_empty());
        assert_eq!(drain(&mut buffer, 110), vec![3, 4]);
        assert_eq!(buffer.stats().discontinuities, 1);

        // The skipped packet arriving now is too late
        assert!(!buffer.add(packet(2, 120)));
        assert_eq!(buffer.stats().packets_too_late, 1);
    }

    #[test]
    fn test_overflow_skips_gap() {
        let mut buffer = ReorderBuffer::new(1000, 2);
        buffer.add(packet(0, 0));
        drain(&mut buffer, 0);

        buffer.add(packet(2, 0));
        buffer.add(packet(3, 0));
        assert!(drain(&mut buffer, 0).is_empty());
        buffer.add(packet(4, 0));
        assert_eq!(drain(&mut buffer, 0), vec![2, 3, 4]);
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut buffer = ReorderBuffer::new(100, 64);
        buffer.add(packet(1, 0));
        drain(&mut buffer, 0);
        buffer.add(packet(3, 0));
        assert!(!buffer.add(packet(3, 0)));
        assert_eq!(buffer.stats().duplicates, 1);
    }

    #[test]
    fn test_reset_restarts_ordering() {
        let mut buffer = ReorderBuffer::new(100, 64);
        buffer.add(packet(100, 0));
        drain(&mut buffer, 0);
        buffer.add(packet(105, 0));
        buffer.reset();
        assert!(buffer.is_empty());

        // Anything is accepted after a reset
        assert!(buffer.add(packet(50, 0)));
        assert_eq!(drain(&mut buffer, 0), vec![50]);
    }
}
