use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;


/// The application's receive callback: it is called for every message that is handed to the
///  application, after the message was acknowledged to its sender.
///
/// NB: Delivery is at-least-once. A message whose acknowledgment got lost is retransmitted and
///      delivered again unless duplicate suppression is configured.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, sender_addr: SocketAddr, sequence: u64, payload: &str);
}
