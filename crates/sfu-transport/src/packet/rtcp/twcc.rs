//! Transport-wide congestion control feedback
//! (draft-holmer-rmcat-transport-wide-cc-extensions-01)
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      base sequence number     |      packet status count      |
//! |                 reference time                | fb pkt. count |
//! |          packet chunk         |         packet chunk          |
//! |         recv delta            |  recv delta   | zero padding  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::Result;

/// Reference time resolution in microseconds
const REFERENCE_TIME_UNIT_US: u64 = 64_000;

/// Receive delta resolution in microseconds
const DELTA_UNIT_US: i64 = 250;

/// Longest run representable by a run-length chunk
const MAX_RUN_LENGTH: u16 = 0x1FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketStatus {
    NotReceived = 0,
    SmallDelta = 1,
    LargeDelta = 2,
}

impl PacketStatus {
    fn from_symbol(symbol: u16) -> Result<Self> {
        match symbol {
            0 => Ok(PacketStatus::NotReceived),
            1 => Ok(PacketStatus::SmallDelta),
            2 => Ok(PacketStatus::LargeDelta),
            other => Err(Error::ProtocolParse(format!("Reserved packet status symbol {}", other))),
        }
    }
}

/// Arrival times of a contiguous range of transport-wide sequence numbers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportWideFeedback {
    /// Feedback packet counter, incremented per feedback sent
    pub feedback_packet_count: u8,

    /// Transport sequence number to arrival time in microseconds;
    /// zero marks a packet as not received
    pub packets: BTreeMap<u32, u64>,
}

impl TransportWideFeedback {
    pub fn new(feedback_packet_count: u8) -> Self {
        Self {
            feedback_packet_count,
            packets: BTreeMap::new(),
        }
    }

    /// Record an arrival (or a loss with `time_us == 0`)
    pub fn add_packet(&mut self, seq: u32, time_us: u64) {
        self.packets.insert(seq, time_us);
    }

    /// Sequence numbers reported as not received
    pub fn lost(&self) -> Vec<u32> {
        self.packets
            .iter()
            .filter(|(_, time)| **time == 0)
            .map(|(seq, _)| *seq)
            .collect()
    }

    /// Serialize the FCI, zero padded to a 32-bit boundary
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        let (Some(&base), Some(&last)) = (self.packets.keys().next(), self.packets.keys().next_back()) else {
            return Err(Error::ProtocolParse("Transport-wide feedback without packets".to_string()));
        };

        let count = last - base + 1;
        if count > u16::MAX as u32 {
            return Err(Error::ProtocolParse(format!("Transport-wide feedback spans {} packets", count)));
        }

        let first_time = self.packets.values().copied().find(|time| *time != 0).unwrap_or(0);
        let reference = first_time / REFERENCE_TIME_UNIT_US;
        let mut previous = (reference * REFERENCE_TIME_UNIT_US) as i64;

        let mut statuses = Vec::with_capacity(count as usize);
        let mut deltas = BytesMut::new();
        for seq in base..=last {
            let time = self.packets.get(&seq).copied().unwrap_or(0);
            if time == 0 {
                statuses.push(PacketStatus::NotReceived);
                continue;
            }
            let ticks = (time as i64 - previous) / DELTA_UNIT_US;
            if (0..=255).contains(&ticks) {
                statuses.push(PacketStatus::SmallDelta);
                deltas.put_u8(ticks as u8);
            } else {
                let ticks = ticks.clamp(i16::MIN as i64, i16::MAX as i64);
                statuses.push(PacketStatus::LargeDelta);
                deltas.put_i16(ticks as i16);
            }
            previous += ticks * DELTA_UNIT_US;
        }

        let start = buf.len();
        buf.put_u16(base as u16);
        buf.put_u16(count as u16);
        buf.put_u32(((reference as u32) & 0x00FF_FFFF) << 8 | self.feedback_packet_count as u32);

        // Run-length chunks
        let mut i = 0;
        while i < statuses.len() {
            let status = statuses[i];
            let mut run = 1u16;
            while i + (run as usize) < statuses.len()
                && statuses[i + run as usize] == status
                && run < MAX_RUN_LENGTH
            {
                run += 1;
            }
            buf.put_u16((status as u16) << 13 | run);
            i += run as usize;
        }

        buf.put_slice(&deltas);
        while (buf.len() - start) % 4 != 0 {
            buf.put_u8(0);
        }

        Ok(())
    }

    /// Parse the FCI of a transport-wide feedback packet
    ///
    /// Sequence numbers are reported unextended, starting at the base
    /// sequence number.
    pub fn parse(fci: &[u8]) -> Result<Self> {
        if fci.len() < 8 {
            return Err(Error::BufferTooSmall {
                required: 8,
                available: fci.len(),
            });
        }

        let base = u16::from_be_bytes([fci[0], fci[1]]) as u32;
        let count = u16::from_be_bytes([fci[2], fci[3]]) as usize;
        let reference = (u32::from_be_bytes([0, fci[4], fci[5], fci[6]])) as u64;
        let feedback_packet_count = fci[7];

        let mut pos = 8;
        let mut statuses = Vec::with_capacity(count);
        while statuses.len() < count {
            if pos + 2 > fci.len() {
                return Err(Error::ProtocolParse("Truncated packet status chunk".to_string()));
            }
            let chunk = u16::from_be_bytes([fci[pos], fci[pos + 1]]);
            pos += 2;

            if chunk & 0x8000 == 0 {
                let status = PacketStatus::from_symbol((chunk >> 13) & 0x03)?;
                let run = (chunk & MAX_RUN_LENGTH) as usize;
                statuses.extend(std::iter::repeat(status).take(run.min(count - statuses.len())));
            } else if chunk & 0x4000 == 0 {
                for bit in (0..14).rev() {
                    statuses.push(PacketStatus::from_symbol((chunk >> bit) & 0x01)?);
                }
            } else {
                for pair in (0..7).rev() {
                    statuses.push(PacketStatus::from_symbol((chunk >> (pair * 2)) & 0x03)?);
                }
            }
        }
        statuses.truncate(count);

        let mut feedback = Self::new(feedback_packet_count);
        let mut time = (reference * REFERENCE_TIME_UNIT_US) as i64;
        for (i, status) in statuses.into_iter().enumerate() {
            let seq = (base + i as u32) & 0xFFFF;
            match status {
                PacketStatus::NotReceived => {
                    feedback.add_packet(seq, 0);
                }
                PacketStatus::SmallDelta => {
                    let delta = *fci.get(pos).ok_or_else(|| Error::ProtocolParse("Truncated receive delta".to_string()))?;
                    pos += 1;
                    time += delta as i64 * DELTA_UNIT_US;
                    feedback.add_packet(seq, time.max(0) as u64);
                }
                PacketStatus::LargeDelta => {
                    if pos + 2 > fci.len() {
                        return Err(Error::ProtocolParse("Truncated receive delta".to_string()));
                    }
                    let delta = i16::from_be_bytes([fci[pos], fci[pos + 1]]);
                    pos += 2;
                    time += delta as i64 * DELTA_UNIT_US;
                    feedback.add_packet(seq, time.max(0) as u64);
                }
            }
        }

        Ok(feedback)
    }
}
