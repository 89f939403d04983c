//! RTP Packet module
//!
//! This module provides the RTP fixed header, RFC 8285 header extensions, the
//! in-flight packet type and the RTCP packets exchanged by the transport.

pub mod rtp;
pub mod header;
pub mod extension;
pub mod rtcp;

pub use rtp::*;
pub use header::*;
pub use extension::*;
