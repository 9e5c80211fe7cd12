use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::message_dispatcher::MessageDispatcher;


/// Records every message that is delivered to the application
#[derive(Debug, Default)]
pub struct TrackingMessageDispatcher {
    tracker: Arc<RwLock<Vec<(SocketAddr, u64, String)>>>,
    notify: Notify,
}
impl TrackingMessageDispatcher {
    pub fn new() -> Self {
        Default::default()
    }

    /// returns delivered messages, clearing the internal buffer
    pub async fn delivered(&self) -> Vec<(SocketAddr, u64, String)> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    pub async fn delivered_payloads(&self) -> Vec<String> {
        self.tracker.read().await
            .iter()
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    /// waits until at least `n` messages were delivered and not yet taken out
    pub async fn wait_for(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.tracker.read().await.len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessageDispatcher for TrackingMessageDispatcher {
    async fn on_message(&self, sender_addr: SocketAddr, sequence: u64, payload: &str) {
        self.tracker.write().await.push((sender_addr, sequence, payload.to_string()));
        self.notify.notify_waiters();
    }
}
