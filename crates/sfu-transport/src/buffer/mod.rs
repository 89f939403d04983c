//! Packet buffers
//!
//! The reorder buffer sits on the receive side of each incoming group. The
//! shadow store keeps sent packets of each outgoing group around for
//! retransmission.

pub mod reorder;
pub mod rtx;

pub use reorder::{ReorderBuffer, ReorderBufferStats};
pub use rtx::RtxShadowStore;
