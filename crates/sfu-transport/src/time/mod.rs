//! Time and clock utilities for the media transport
//!
//! Every time-dependent decision in the transport (retransmission retention,
//! reorder waits, transport-wide feedback arrival times, RTCP report delays)
//! reads an injected [`Clock`] so that tests can drive time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::packet::rtcp::NtpTimestamp;

/// Source of wall-clock time in microseconds since the UNIX epoch
pub trait Clock: Send + Sync {
    /// Current time in microseconds
    fn now_micros(&self) -> u64;

    /// Current time in milliseconds
    fn now_millis(&self) -> u64 {
        self.now_micros() / 1000
    }

    /// Current time as an NTP timestamp
    fn now_ntp(&self) -> NtpTimestamp {
        NtpTimestamp::from_duration_since_unix_epoch(Duration::from_micros(self.now_micros()))
    }
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_micros() as u64
    }
}

/// Manually advanced clock for deterministic tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given time in milliseconds
    pub fn new(start_millis: u64) -> Self {
        Self {
            micros: AtomicU64::new(start_millis * 1000),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Move the clock forward by a number of milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Jump to an absolute time in microseconds
    pub fn set_micros(&self, micros: u64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

/// Convert a duration in middle-32 NTP units (1/65536 s) to milliseconds
pub fn ntp_short_to_millis(value: u32) -> u64 {
    (value as u64 * 1000) >> 16
}

/// Convert milliseconds to middle-32 NTP units (1/65536 s)
pub fn millis_to_ntp_short(millis: u64) -> u32 {
    ((millis << 16) / 1000) as u32
}
