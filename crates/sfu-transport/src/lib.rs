//! Secure media transport for the RVOIP selective forwarding unit
//!
//! This crate carries DTLS-keyed, SRTP-protected RTP and RTCP for many media
//! streams over one bundled socket per peer. It detects loss, requests and
//! serves retransmissions, and produces transport-wide congestion feedback.
//!
//! The library is organized into several modules:
//!
//! - `packet`: RTP header, header extensions and RTCP packets
//! - `srtp`: SRTP and SRTCP sessions
//! - `dtls`: DTLS demultiplexing and the handshake engine interface
//! - `channel`: the send and receive crypto sessions of a transport
//! - `seq`: sequence number extension across wraps
//! - `group` / `registry`: source groups and SSRC routing
//! - `buffer`: reorder buffer and retransmission store
//! - `stats`: loss tracking and round trip time
//! - `transport`: the transport itself and its UDP adapter
//! - `time`: clocks and NTP conversions
//! - `config`: negotiated media properties and transport tuning

mod error;

// Main modules
pub mod buffer;
pub mod channel;
pub mod config;
pub mod dtls;
pub mod group;
pub mod packet;
pub mod registry;
pub mod seq;
pub mod srtp;
pub mod stats;
pub mod time;
pub mod transport;

// Re-export core types
pub use error::{Error, SrtpStatus};

pub use config::{Codec, MediaProperties, MediaType, TransportConfig};
pub use group::{IncomingSourceGroup, OutgoingSourceGroup, SourceGroupInfo, SourceGroupListener};
pub use packet::{RtpHeader, RtpPacket};
pub use registry::GroupId;
pub use transport::{DtlsIceTransport, PacketSender, RemoteCandidate};

/// The default maximum size for RTP packets in bytes
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

/// Typedef for RTP timestamp values
pub type RtpTimestamp = u32;

/// Typedef for RTP sequence numbers
pub type RtpSequenceNumber = u16;

/// Typedef for RTP synchronization source identifier
pub type RtpSsrc = u32;

/// Typedef for RTP contributing source identifier
pub type RtpCsrc = u32;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Codec, DtlsIceTransport, Error, GroupId, IncomingSourceGroup, MediaProperties, MediaType,
        OutgoingSourceGroup, PacketSender, RemoteCandidate, Result, RtpCsrc, RtpHeader, RtpPacket,
        RtpSequenceNumber, RtpSsrc, RtpTimestamp, SourceGroupInfo, SourceGroupListener,
        TransportConfig,
    };

    pub use crate::packet::rtcp::{
        NtpTimestamp, RtcpCompoundPacket, RtcpPacket, RtcpReceiverReport, RtcpReportBlock,
        RtcpSenderReport,
    };

    pub use crate::time::{Clock, ManualClock, SystemClock};
}
