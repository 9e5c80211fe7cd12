use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::trace;


/// Things happening in a session that the application may want to react to, apart from
///  received messages (which go through [crate::message_dispatcher::MessageDispatcher]).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEvent {
    /// The first packet from the configured peer arrived, i.e. the NAT binding is open in
    ///  the inbound direction
    PeerReachable(SocketAddr),
    /// A message was acknowledged by the peer and removed from the pending table
    Acknowledged(u64),
    /// A message reached the configured maximum number of transmissions without being
    ///  acknowledged, and it was given up on
    DeliveryFailed(u64),
    /// The receive loop terminated because of a socket error - no more packets will be processed
    ReceiveLoopFailed(String),
}

pub struct SessionEventNotifier {
    sender: broadcast::Sender<SessionEvent>,
}
impl SessionEventNotifier {
    pub fn new() -> SessionEventNotifier {
        let (sender, _) = broadcast::channel(128);

        SessionEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: SessionEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let notifier = SessionEventNotifier::new();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.send_event(SessionEvent::Acknowledged(3));

        assert_eq!(a.recv().await.unwrap(), SessionEvent::Acknowledged(3));
        assert_eq!(b.recv().await.unwrap(), SessionEvent::Acknowledged(3));
    }

    #[test]
    fn test_send_without_subscribers() {
        let notifier = SessionEventNotifier::new();
        notifier.send_event(SessionEvent::DeliveryFailed(1));
    }
}
