use std::collections::BTreeSet;

use crate::packet::rtcp::NackField;

/// Lost packet tracker for an incoming source group
///
/// Records every extended sequence number skipped by an arrival, forgets it
/// when it shows up late (e.g. through RTX) and produces the generic NACK
/// fields requesting what is still missing.
#[derive(Debug, Clone)]
pub struct LostPackets {
    /// Extended sequence numbers still missing
    lost: BTreeSet<u32>,

    /// Highest extended sequence number received
    highest: Option<u32>,

    /// Losses further than this behind `highest` are forgotten
    window: u32,

    /// Number of packets received
    received: u64,

    /// Number of losses ever detected
    total_lost: u64,

    /// Number of late arrivals that filled a loss
    recovered: u64,
}

impl LostPackets {
    /// Create a tracker remembering losses up to `window` packets back
    pub fn new(window: u32) -> Self {
        Self {
            lost: BTreeSet::new(),
            highest: None,
            window: window.max(1),
            received: 0,
            total_lost: 0,
            recovered: 0,
        }
    }

    /// Register an arrival and return how many new losses it revealed
    pub fn add(&mut self, ext_seq: u32) -> u32 {
        self.received += 1;

        let Some(highest) = self.highest else {
            self.highest = Some(ext_seq);
            return 0;
        };

        if ext_seq <= highest {
            if self.lost.remove(&ext_seq) {
                self.recovered += 1;
            }
            return 0;
        }

        let first_lost = (highest + 1).max(ext_seq.saturating_sub(self.window));
        let newly_lost = ext_seq - first_lost;
        self.lost.extend(first_lost..ext_seq);
        self.total_lost += newly_lost as u64;
        self.highest = Some(ext_seq);

        // Forget losses that slid out of the window
        let floor = ext_seq.saturating_sub(self.window);
        self.lost = self.lost.split_off(&floor);

        newly_lost
    }

    /// NACK fields requesting every currently missing packet
    pub fn nacks(&self) -> Vec<NackField> {
        let lost: Vec<u32> = self.lost.iter().copied().collect();
        NackField::pack(&lost)
    }

    /// Number of packets currently missing
    pub fn total(&self) -> usize {
        self.lost.len()
    }

    pub fn is_lost(&self, ext_seq: u32) -> bool {
        self.lost.contains(&ext_seq)
    }

    pub fn highest(&self) -> Option<u32> {
        self.highest
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total_lost(&self) -> u64 {
        self.total_lost
    }

    pub fn recovered(&self) -> u64 {
        self.recovered
    }

    /// Forget all state
    pub fn reset(&mut self) {
        self.lost.clear();
        self.highest = None;
        self.received = 0;
        self.total_lost = 0;
        self.recovered = 0;
    }
}
