use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::packet::Packet;
use crate::transport::SendSocket;


/// Records every packet instead of sending it
#[derive(Debug, Default)]
pub struct TrackingSendSocket {
    tracker: Arc<RwLock<Vec<(SocketAddr, Vec<u8>)>>>,
}
impl TrackingSendSocket {
    pub fn new() -> Self {
        Default::default()
    }

    /// returns sent packets, clearing the internal buffer
    pub async fn sent_packets(&self) -> Vec<(SocketAddr, Packet)> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
            .into_iter()
            .map(|(to, buf)| (to, Packet::try_deser(&mut buf.as_slice()).expect("only valid packets should be sent")))
            .collect()
    }

    pub async fn num_sent(&self) -> usize {
        self.tracker.read().await.len()
    }

    pub async fn assert_packet_sent(&self, to: SocketAddr, packet: Packet) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no packet was sent");
        }

        let (actual_to, actual_buf) = lock.remove(0);
        let actual = Packet::try_deser(&mut actual_buf.as_slice()).expect("only valid packets should be sent");
        assert_eq!(actual, packet);
        assert_eq!(actual_to, to);
    }

    pub async fn assert_no_remaining_packets(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected packets: {:?}", lock);
    }
}

#[async_trait]
impl SendSocket for TrackingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.tracker.write().await.push((to, packet_buf.to_vec()));
    }
}
