//! UDP network adapter
//!
//! Binds the transport to a single tokio UDP socket shared by DTLS, SRTP and
//! SRTCP. Sends never wait on the socket: a datagram the kernel cannot take
//! right away is reported as an error and dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

use crate::error::Error;
use crate::srtp::SRTP_MAX_TRAILER_LEN;
use crate::Result;

use super::{DtlsIceTransport, PacketSender, RemoteCandidate};

/// Network collaborator backed by a UDP socket
#[derive(Debug, Clone)]
pub struct UdpPacketSender {
    socket: Arc<UdpSocket>,
}

impl UdpPacketSender {
    /// Bind a new socket
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Io(format!("Failed to bind UDP socket on {}: {}", addr, e)))?;
        Ok(Self::from_socket(Arc::new(socket)))
    }

    pub fn from_socket(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Feed every datagram received on the socket to `transport`
    ///
    /// The task runs until aborted.
    pub fn spawn_receive_loop(&self, transport: Arc<DtlsIceTransport>) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let buffer_size = transport.mtu() + SRTP_MAX_TRAILER_LEN;
        info!("Starting UDP receive loop on {:?}", socket.local_addr().ok());

        tokio::spawn(async move {
            // Room for a full-size packet plus its SRTP trailer
            let mut buffer = vec![0u8; buffer_size];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((size, addr)) => {
                        trace!("Received {} bytes from {}", size, addr);
                        let candidate = RemoteCandidate::new(addr, 0);
                        transport.on_data(&candidate, &buffer[..size]);
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }
}

impl PacketSender for UdpPacketSender {
    fn send(&self, candidate: &RemoteCandidate, data: &[u8]) -> std::io::Result<usize> {
        self.socket.try_send_to(data, candidate.addr)
    }
}
