//! Per-source statistics
//!
//! Loss tracking for incoming streams (which drives generic NACK) and
//! round-trip time estimation for outgoing streams (which drives the
//! retransmission retention window).

pub mod loss;
pub mod rtt;

pub use loss::LostPackets;
pub use rtt::RttEstimator;
