use std::net::SocketAddr;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};

use crate::packet::Packet;
use crate::transport::SendSocket;


/// Sends a burst of `count` heartbeats to the peer, `interval` apart.
///
/// A NAT only lets a datagram from outside through if it matches a mapping created by outbound
///  traffic. Both peers run this at roughly the same time, so that each side's outbound
///  heartbeats create the mapping that the other side's heartbeats then match. No response is
///  expected here; the link shows it is open by regular traffic arriving later.
pub async fn punch(send_socket: &dyn SendSocket, peer: SocketAddr, count: usize, interval: Duration) {
    info!("punching hole to {:?} with {} heartbeats", peer, count);

    let heartbeat = Packet::heartbeat().to_bytes();
    for i in 0..count {
        if i > 0 {
            time::sleep(interval).await;
        }
        debug!("hole punching heartbeat {}/{} to {:?}", i + 1, count, peer);
        send_socket.do_send_packet(peer, &heartbeat).await;
    }
}
