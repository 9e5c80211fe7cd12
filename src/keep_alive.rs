use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::packet::Packet;
use crate::peer_endpoint::PeerEndpoint;
use crate::transport::SendSocket;


/// Sends a heartbeat to the peer every `interval` so that NATs and firewalls on the route do not
///  evict the binding for being idle. Ticks before a peer is known do nothing.
pub async fn run_keep_alive(
    send_socket: Arc<dyn SendSocket>,
    peer: PeerEndpoint,
    interval: Duration,
    mut cancel_receiver: broadcast::Receiver<()>,
) {
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => keep_alive_tick(send_socket.as_ref(), &peer).await,
            _ = cancel_receiver.recv() => {
                debug!("keep-alive loop canceled");
                return;
            }
        }
    }
}

async fn keep_alive_tick(send_socket: &dyn SendSocket, peer: &PeerEndpoint) {
    if let Some(peer_addr) = peer.get() {
        debug!("sending keep-alive heartbeat to {:?}", peer_addr);
        send_socket.do_send_packet(peer_addr, &Packet::heartbeat().to_bytes()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::addr::test_addr_from_number;
    use crate::test_util::send_socket::TrackingSendSocket;

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_only_with_peer() {
        let socket = Arc::new(TrackingSendSocket::new());
        let peer = PeerEndpoint::new();
        let (cancel_sender, _) = broadcast::channel(1);

        let handle = tokio::spawn(run_keep_alive(socket.clone(), peer.clone(), Duration::from_secs(20), cancel_sender.subscribe()));

        time::sleep(Duration::from_secs(61)).await;
        socket.assert_no_remaining_packets().await;

        peer.set(test_addr_from_number(4)).unwrap();

        // next tick at 80 seconds
        time::sleep(Duration::from_secs(20)).await;
        socket.assert_packet_sent(test_addr_from_number(4), Packet::heartbeat()).await;
        socket.assert_no_remaining_packets().await;

        time::sleep(Duration::from_secs(20)).await;
        socket.assert_packet_sent(test_addr_from_number(4), Packet::heartbeat()).await;
        socket.assert_no_remaining_packets().await;

        cancel_sender.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_without_peer() {
        let socket = TrackingSendSocket::new();
        keep_alive_tick(&socket, &PeerEndpoint::new()).await;
        socket.assert_no_remaining_packets().await;
    }
}
