//! Bundled DTLS-SRTP media transport
//!
//! One [`DtlsIceTransport`] serves one peer over one socket. It demultiplexes
//! inbound datagrams (DTLS, SRTCP, SRTP), routes media to the registered
//! source groups, detects loss, generates NACK and transport-wide feedback,
//! and protects, sends and retransmits outbound media.
//!
//! All mutable state sits behind one lock held for the whole of every public
//! call, so the transport behaves as a single serialized actor. Listener
//! callbacks run inside that lock.

mod incoming;
mod outgoing;
mod rtcp;
pub mod udp;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{Direction, SecureChannel};
use crate::config::{MediaProperties, NegotiatedMaps, TransportConfig};
use crate::dtls::{DtlsHandshake, DtlsSetup, DtlsSrtpSetup, FingerprintHash};
use crate::error::Error;
use crate::group::{IncomingSourceGroup, OutgoingSourceGroup};
use crate::packet::RtpPacket;
use crate::packet::rtcp::RtcpCompoundPacket;
use crate::registry::{GroupId, SourceGroupRegistry};
use crate::seq::WrapExtender;
use crate::time::{Clock, SystemClock};
use crate::{Result, RtpSsrc};

pub use udp::UdpPacketSender;

/// Remote ICE candidate media can be sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    /// Remote transport address
    pub addr: SocketAddr,

    /// ICE priority
    pub priority: u32,
}

impl RemoteCandidate {
    pub fn new(addr: SocketAddr, priority: u32) -> Self {
        Self { addr, priority }
    }
}

/// Network collaborator used to put datagrams on the wire
///
/// Called with the transport lock held; implementations must not block.
pub trait PacketSender: Send + Sync {
    /// Send one datagram, returning the number of bytes sent
    fn send(&self, candidate: &RemoteCandidate, data: &[u8]) -> io::Result<usize>;
}

/// ICE username fragment and password
#[derive(Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for IceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Known remote candidates and the one all sends go to
#[derive(Debug, Default)]
struct CandidateSet {
    list: Vec<RemoteCandidate>,
    active: Option<usize>,
}

impl CandidateSet {
    fn active(&self) -> Option<&RemoteCandidate> {
        self.active.and_then(|index| self.list.get(index))
    }
}

/// Send a datagram to the active candidate
fn transmit(sender: &dyn PacketSender, candidates: &CandidateSet, data: &[u8]) -> Result<usize> {
    let candidate = candidates
        .active()
        .ok_or_else(|| Error::State("No active candidate yet".to_string()))?;
    Ok(sender.send(candidate, data)?)
}

/// State guarded by the transport lock
struct TransportState {
    config: TransportConfig,

    /// Codec, RTX association and header extension tables
    maps: NegotiatedMaps,

    candidates: CandidateSet,

    /// Send and receive SRTP sessions
    channel: SecureChannel,

    /// DTLS handshake engine, if DTLS keying is used
    dtls: Option<Box<dyn DtlsHandshake>>,

    incoming: SourceGroupRegistry<IncomingSourceGroup>,
    outgoing: SourceGroupRegistry<OutgoingSourceGroup>,

    local_ice: Option<IceCredentials>,
    remote_ice: Option<IceCredentials>,

    /// Next transport-wide sequence number stamped on sent video
    transport_seq: u16,

    /// Count of transport-wide feedback packets sent
    feedback_packet_count: u8,

    /// Extends received transport-wide sequence numbers
    transport_wide: WrapExtender<u16, u32>,

    /// Highest extended transport-wide sequence number fed back
    last_feedback_seq: Option<u32>,

    sender: Arc<dyn PacketSender>,
    clock: Arc<dyn Clock>,
}

impl TransportState {
    /// SSRC used as sender of generated RTCP
    fn first_outgoing_ssrc(&self) -> RtpSsrc {
        self.outgoing.first().map_or(1, |group| group.media.ssrc)
    }

    fn next_transport_seq(&mut self) -> u16 {
        let seq = self.transport_seq;
        self.transport_seq = seq.wrapping_add(1);
        seq
    }

    /// Configure both SRTP directions from a completed DTLS handshake
    fn on_handshake_setup(&mut self, setup: DtlsSrtpSetup) -> Result<()> {
        let suite = setup.profile.srtp_suite_name();
        info!("DTLS handshake completed with profile {:?}", setup.profile);
        self.channel.configure(Direction::Send, suite, &setup.local_key)?;
        self.channel.configure(Direction::Receive, suite, &setup.remote_key)?;
        Ok(())
    }

    /// Pick up keys from the handshake engine if it just completed
    fn poll_handshake(&mut self) {
        let Some(setup) = self.dtls.as_mut().and_then(|dtls| dtls.take_srtp_setup()) else {
            return;
        };
        if let Err(e) = self.on_handshake_setup(setup) {
            warn!("Failed to key SRTP from DTLS: {}", e);
        }
    }

    /// Relay everything the handshake engine wants to send
    fn flush_handshake(&mut self, to: Option<&RemoteCandidate>) {
        let Some(candidate) = to.or_else(|| self.candidates.active()) else {
            debug!("Holding DTLS records until a candidate is active");
            return;
        };
        let Some(dtls) = self.dtls.as_mut() else {
            return;
        };
        while let Some(record) = dtls.read() {
            if let Err(e) = self.sender.send(candidate, &record) {
                warn!("Failed to send DTLS record to {}: {}", candidate.addr, e);
            }
        }
    }

    fn reset(&mut self) {
        self.channel.reset();
        self.local_ice = None;
        self.remote_ice = None;
        self.transport_seq = 0;
        self.feedback_packet_count = 0;
        self.transport_wide.reset();
        self.last_feedback_seq = None;
    }
}

/// Secure media transport for one peer
pub struct DtlsIceTransport {
    state: Mutex<TransportState>,
}

impl DtlsIceTransport {
    /// Create a transport sending through `sender` and reading the system clock
    pub fn new(config: TransportConfig, sender: Arc<dyn PacketSender>) -> Self {
        Self::with_clock(config, sender, Arc::new(SystemClock))
    }

    /// Create a transport reading time from `clock`
    pub fn with_clock(config: TransportConfig, sender: Arc<dyn PacketSender>, clock: Arc<dyn Clock>) -> Self {
        let channel = SecureChannel::new(config.replay_window);
        Self {
            state: Mutex::new(TransportState {
                config,
                maps: NegotiatedMaps::default(),
                candidates: CandidateSet::default(),
                channel,
                dtls: None,
                incoming: SourceGroupRegistry::new(),
                outgoing: SourceGroupRegistry::new(),
                local_ice: None,
                remote_ice: None,
                transport_seq: 0,
                feedback_packet_count: 0,
                transport_wide: WrapExtender::new(),
                last_feedback_seq: None,
                sender,
                clock,
            }),
        }
    }

    /// Attach the DTLS handshake engine
    pub fn set_dtls(&self, dtls: Box<dyn DtlsHandshake>) {
        self.state.lock().dtls = Some(dtls);
    }

    /// Handle a datagram received from `candidate`
    ///
    /// Failures are logged and the datagram dropped; nothing is returned to
    /// the network layer.
    pub fn on_data(&self, candidate: &RemoteCandidate, data: &[u8]) {
        let mut state = self.state.lock();
        match state.on_data(candidate, data) {
            Ok(()) => {}
            Err(e) if e.is_crypto_drop() => {
                warn!("Dropped datagram of {} bytes from {}: {}", data.len(), candidate.addr, e);
            }
            Err(e) => {
                debug!("Dropped datagram of {} bytes from {}: {}", data.len(), candidate.addr, e);
            }
        }
    }

    /// Protect and send a media packet on its outgoing group
    pub fn send_rtp(&self, packet: RtpPacket) -> Result<()> {
        let mut state = self.state.lock();
        state.send_rtp(packet).inspect_err(|e| warn!("Failed to send RTP packet: {}", e))
    }

    /// Protect and send an RTCP compound packet
    pub fn send_rtcp(&self, compound: &RtcpCompoundPacket) -> Result<()> {
        let mut state = self.state.lock();
        state.send_rtcp(compound).map(|_| ())
    }

    /// Resend a packet of an outgoing group as RTX
    ///
    /// Returns whether the packet was still shadowed and went out again.
    pub fn retransmit(&self, group: GroupId, seq: u16) -> bool {
        let mut state = self.state.lock();
        match state.retransmit(group, seq) {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Failed to retransmit seq {}: {}", seq, e);
                false
            }
        }
    }

    /// Ask the sender of an incoming stream for a key frame
    ///
    /// Buffered packets and losses of the group are dropped first.
    pub fn send_pli(&self, ssrc: RtpSsrc) -> Result<()> {
        let mut state = self.state.lock();
        state.send_pli(ssrc)
    }

    /// Add a remote candidate, making it active if none is or if nominated
    pub fn add_remote_candidate(&self, addr: SocketAddr, use_candidate: bool, priority: u32) -> RemoteCandidate {
        let mut state = self.state.lock();
        let candidate = RemoteCandidate::new(addr, priority);
        debug!("Remote candidate {} use:{} prio:{}", addr, use_candidate, priority);

        state.candidates.list.push(candidate.clone());
        if state.candidates.active.is_none() || use_candidate {
            state.candidates.active = Some(state.candidates.list.len() - 1);
        }

        // A DTLS client has its hello pending until a candidate is known
        state.flush_handshake(None);
        state.poll_handshake();
        candidate
    }

    pub fn active_candidate(&self) -> Option<RemoteCandidate> {
        self.state.lock().candidates.active().cloned()
    }

    /// Apply negotiated codecs and header extensions
    pub fn set_properties(&self, properties: &MediaProperties) {
        let mut state = self.state.lock();
        state.maps = properties.negotiated_maps();
        debug!(
            "Applied media properties with {} header extensions",
            state.maps.extensions.len()
        );
    }

    /// Key the send direction from SDES
    pub fn set_local_crypto_sdes(&self, suite: &str, key: &[u8]) -> Result<()> {
        self.state.lock().channel.configure(Direction::Send, suite, key)
    }

    /// Key the receive direction from SDES
    pub fn set_remote_crypto_sdes(&self, suite: &str, key: &[u8]) -> Result<()> {
        self.state.lock().channel.configure(Direction::Receive, suite, key)
    }

    /// Hand the remote DTLS setup and certificate fingerprint to the handshake
    /// engine and start it
    pub fn set_remote_crypto_dtls(&self, setup: &str, hash: &str, fingerprint: &str) -> Result<()> {
        let setup: DtlsSetup = setup.parse()?;
        let hash: FingerprintHash = hash.parse()?;

        let mut state = self.state.lock();
        let dtls = state
            .dtls
            .as_mut()
            .ok_or_else(|| Error::State("No DTLS handshake engine".to_string()))?;

        dtls.set_remote_setup(setup);
        dtls.set_remote_fingerprint(hash, fingerprint);
        dtls.init()?;
        info!("Remote DTLS setup {:?} with {} fingerprint", setup, hash);

        state.flush_handshake(None);
        state.poll_handshake();
        Ok(())
    }

    /// Configure SRTP from keys negotiated by DTLS
    pub fn on_handshake_setup(&self, setup: DtlsSrtpSetup) -> Result<()> {
        self.state.lock().on_handshake_setup(setup)
    }

    pub fn set_local_stun_credentials(&self, username: &str, password: &str) {
        self.state.lock().local_ice = Some(IceCredentials {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    pub fn set_remote_stun_credentials(&self, username: &str, password: &str) {
        self.state.lock().remote_ice = Some(IceCredentials {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    pub fn local_stun_credentials(&self) -> Option<IceCredentials> {
        self.state.lock().local_ice.clone()
    }

    pub fn remote_stun_credentials(&self) -> Option<IceCredentials> {
        self.state.lock().remote_ice.clone()
    }

    /// Register an incoming group under each of its SSRCs
    pub fn add_incoming_source_group(&self, mut group: IncomingSourceGroup) -> Result<GroupId> {
        let mut state = self.state.lock();
        group.apply_config(&state.config);
        state.incoming.add(group)
    }

    pub fn remove_incoming_source_group(&self, id: GroupId) -> Option<IncomingSourceGroup> {
        self.state.lock().incoming.remove(id)
    }

    /// Register an outgoing group under each of its SSRCs
    pub fn add_outgoing_source_group(&self, group: OutgoingSourceGroup) -> Result<GroupId> {
        self.state.lock().outgoing.add(group)
    }

    pub fn remove_outgoing_source_group(&self, id: GroupId) -> Option<OutgoingSourceGroup> {
        self.state.lock().outgoing.remove(id)
    }

    /// Incoming group owning `ssrc`
    pub fn lookup_incoming(&self, ssrc: RtpSsrc) -> Option<GroupId> {
        self.state.lock().incoming.lookup(ssrc)
    }

    /// Outgoing group owning `ssrc`
    pub fn lookup_outgoing(&self, ssrc: RtpSsrc) -> Option<GroupId> {
        self.state.lock().outgoing.lookup(ssrc)
    }

    /// Inspect an incoming group under the transport lock
    pub fn with_incoming_group<R>(&self, id: GroupId, f: impl FnOnce(&IncomingSourceGroup) -> R) -> Option<R> {
        self.state.lock().incoming.get(id).map(f)
    }

    /// Inspect an outgoing group under the transport lock
    pub fn with_outgoing_group<R>(&self, id: GroupId, f: impl FnOnce(&OutgoingSourceGroup) -> R) -> Option<R> {
        self.state.lock().outgoing.get(id).map(f)
    }

    /// Largest serialized RTP or RTCP packet, before SRTP protection
    pub fn mtu(&self) -> usize {
        self.state.lock().config.mtu
    }

    pub fn can_send(&self) -> bool {
        self.state.lock().channel.can_send()
    }

    pub fn can_receive(&self) -> bool {
        self.state.lock().channel.can_receive()
    }

    /// Drop both SRTP sessions, ICE credentials and transport-wide counters
    pub fn reset(&self) {
        info!("Transport reset");
        self.state.lock().reset();
    }
}

impl fmt::Debug for DtlsIceTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DtlsIceTransport")
            .field("active", &state.candidates.active())
            .field("can_send", &state.channel.can_send())
            .field("can_receive", &state.channel.can_receive())
            .field("incoming", &state.incoming.len())
            .field("outgoing", &state.outgoing.len())
            .finish()
    }
}
