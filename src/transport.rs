use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, span, trace, Instrument, Level};
use uuid::Uuid;

use crate::packet::Packet;


/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    /// NB: Send errors are logged but not returned - on an unreliable transport, a failed send
    ///      is handled the same way as a packet lost in the network
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);
}

#[async_trait]
impl SendSocket for UdpSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}

/// Receiving counterpart of [SendSocket]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecvSocket: Send + Sync + 'static {
    async fn recv_packet(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl RecvSocket for UdpSocket {
    async fn recv_packet(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Decouples the handling of received packets from the socket that receives them
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    async fn on_packet(&self, packet: Packet, from: SocketAddr);
}


/// The transport owns the session's only socket. Discovery, hole punching, keep-alive and
///  regular traffic all go through it, since that is what keeps them on the same NAT mapping.
pub struct Transport {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
}

impl Transport {
    pub async fn bind(addr: SocketAddr, max_datagram_size: usize) -> anyhow::Result<Transport> {
        let socket = UdpSocket::bind(addr).await?;
        info!("bound socket to {:?}", socket.local_addr()?);

        Ok(Transport {
            socket: Arc::new(socket),
            max_datagram_size,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn send_socket(&self) -> Arc<dyn SendSocket> {
        self.socket.clone()
    }

    pub fn recv_socket(&self) -> Arc<dyn RecvSocket> {
        self.socket.clone()
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }
}

/// Receives and dispatches packets until either a cancel signal arrives (returning `Ok`) or the
///  socket fails (returning the error). Datagrams that can not be decoded are dropped without
///  affecting the loop.
pub async fn recv_loop(
    recv_socket: &dyn RecvSocket,
    max_datagram_size: usize,
    handler: Arc<dyn PacketHandler>,
    mut cancel_receiver: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!("starting receive loop");

    let mut buf = vec![0u8; max_datagram_size];
    loop {
        let (num_read, from) = tokio::select! {
            r = recv_socket.recv_packet(&mut buf) => {
                match r {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error, terminating receive loop: {}", e);
                        return Err(e.into());
                    }
                }
            }
            _ = cancel_receiver.recv() => {
                info!("receive loop canceled");
                return Ok(());
            }
        };

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "packet_received", ?correlation_id);

        async {
            trace!("received packet from {:?}: {:?}", from, &buf[..num_read]);

            match Packet::try_deser(&mut &buf[..num_read]) {
                Ok(packet) => handler.on_packet(packet, from).await,
                Err(e) => debug!("received unparsable datagram from {:?} - dropping: {}", from, e),
            }
        }.instrument(span).await;
    }
}
