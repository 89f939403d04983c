use crate::packet::rtcp::{NtpTimestamp, RtcpReportBlock};
use crate::time::ntp_short_to_millis;

/// Smoothing factor of the RTT estimate (RFC 6298)
const ALPHA: f64 = 0.125;

/// Smoothing factor of the RTT variance (RFC 6298)
const BETA: f64 = 0.25;

/// Round-trip time estimator fed by report blocks about our outgoing streams
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT in milliseconds
    rtt: f64,

    /// Smoothed RTT variation in milliseconds
    rtt_var: f64,

    /// Minimum RTT seen in milliseconds
    min_rtt: f64,

    /// Maximum RTT seen in milliseconds
    max_rtt: f64,

    /// Number of samples processed
    samples: u64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            rtt: 0.0,
            rtt_var: 0.0,
            min_rtt: f64::MAX,
            max_rtt: 0.0,
            samples: 0,
        }
    }

    /// Feed a report block received at `now`
    ///
    /// Returns the measured sample in milliseconds, or `None` when the block
    /// does not reference a sender report yet.
    pub fn process_report_block(&mut self, now: NtpTimestamp, block: &RtcpReportBlock) -> Option<f64> {
        self.update(now.to_u32(), block.last_sr, block.delay_since_last_sr)
    }

    /// Feed a raw measurement in middle-32 NTP units
    ///
    /// RTT = A - LSR - DLSR (RFC 3550 Section 6.4.1).
    pub fn update(&mut self, now_mid32: u32, last_sr: u32, delay_since_last_sr: u32) -> Option<f64> {
        if last_sr == 0 {
            return None;
        }

        let elapsed = now_mid32.wrapping_sub(last_sr);
        if elapsed < delay_since_last_sr {
            return None;
        }

        let sample = ntp_short_to_millis(elapsed - delay_since_last_sr) as f64;

        if self.samples == 0 {
            self.rtt = sample;
            self.rtt_var = sample / 2.0;
        } else {
            let delta = self.rtt - sample;
            self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * delta.abs();
            self.rtt = (1.0 - ALPHA) * self.rtt + ALPHA * sample;
        }

        self.samples += 1;
        self.min_rtt = self.min_rtt.min(sample);
        self.max_rtt = self.max_rtt.max(sample);

        Some(sample)
    }

    /// Current estimate in whole milliseconds
    pub fn rtt_ms(&self) -> u64 {
        self.rtt.round() as u64
    }

    pub fn rtt_var_ms(&self) -> f64 {
        self.rtt_var
    }

    pub fn min_rtt_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.min_rtt
        }
    }

    pub fn max_rtt_ms(&self) -> f64 {
        self.max_rtt
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
