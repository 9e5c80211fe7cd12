use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use anyhow::bail;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::discovery::DiscoveryClient;
use crate::hole_punch::punch;
use crate::keep_alive::run_keep_alive;
use crate::message_dispatcher::MessageDispatcher;
use crate::peer_endpoint::PeerEndpoint;
use crate::reliability::{run_retransmit_loop, ReliabilityEngine};
use crate::session_events::{SessionEvent, SessionEventNotifier};
use crate::transport::{recv_loop, RecvSocket, Transport};


enum Lifecycle {
    Created,
    Running(Vec<JoinHandle<()>>),
    ShutDown,
}

/// A single UDP socket linked to one peer, with public address discovery, hole punching,
///  keep-alive and acknowledged messaging on top of it.
///
/// The intended sequence is:
///  * [Session::new] binds the socket
///  * [Session::discover] learns the socket's public address, which is then exchanged with the
///    peer out of band
///  * [Session::connect] fixes the peer, starts the background tasks and punches the hole
///  * [Session::send] and the [MessageDispatcher] passed in at creation time for messages
///  * [Session::shutdown] stops the background tasks
///
/// Dropping the session without shutting it down also stops the background tasks, but without
///  waiting for them.
pub struct Session {
    config: Arc<SessionConfig>,
    transport: Arc<Transport>,
    peer: PeerEndpoint,
    engine: Arc<ReliabilityEngine>,
    event_notifier: Arc<SessionEventNotifier>,
    cancel_sender: broadcast::Sender<()>,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    pub async fn new(config: SessionConfig, message_dispatcher: Arc<dyn MessageDispatcher>) -> anyhow::Result<Session> {
        config.validate()?;
        let config = Arc::new(config);

        let transport = Arc::new(Transport::bind(config.bind_addr, config.max_datagram_size).await?);
        let peer = PeerEndpoint::new();
        let event_notifier = Arc::new(SessionEventNotifier::new());

        let engine = Arc::new(ReliabilityEngine::new(
            config.clone(),
            transport.send_socket(),
            peer.clone(),
            message_dispatcher,
            event_notifier.clone(),
        ));

        let (cancel_sender, _) = broadcast::channel(1);

        Ok(Session {
            config,
            transport,
            peer,
            engine,
            event_notifier,
            cancel_sender,
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_notifier.subscribe()
    }

    /// Asks the configured discovery servers for this session's public address.
    ///
    /// NB: This reads from the session's socket directly, so it is only possible before the
    ///      session is started
    pub async fn discover(&self) -> anyhow::Result<SocketAddrV4> {
        let lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created) {
            bail!("discovery is only possible before the session is started");
        }

        DiscoveryClient::new(self.transport.socket(), self.config.max_datagram_size)
            .discover_any(&self.config.discovery_servers, self.config.discovery_timeout)
            .await
    }

    /// Starts receiving, retransmission and keep-alive. Starting a running session is a no-op.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::ShutDown => bail!("session was shut down"),
            Lifecycle::Created => {}
        }

        info!("starting session on {:?}", self.transport.local_addr()?);

        let recv_task = tokio::spawn(run_receive(
            self.transport.recv_socket(),
            self.transport.max_datagram_size(),
            self.engine.clone(),
            self.event_notifier.clone(),
            self.cancel_sender.subscribe(),
        ));

        let retransmit_task = tokio::spawn(run_retransmit_loop(self.engine.clone(), self.cancel_sender.subscribe()));

        let keep_alive_task = tokio::spawn(run_keep_alive(
            self.transport.send_socket(),
            self.peer.clone(),
            self.config.keep_alive_interval,
            self.cancel_sender.subscribe(),
        ));

        *lifecycle = Lifecycle::Running(vec![recv_task, retransmit_task, keep_alive_task]);
        Ok(())
    }

    /// Sets the peer, starts the session if it is not running yet, and punches a hole to the
    ///  peer. This returns after the last hole punching heartbeat was sent - it does not wait
    ///  for the peer to become reachable (see [SessionEvent::PeerReachable] for that).
    pub async fn connect(&self, peer: SocketAddr) -> anyhow::Result<()> {
        self.peer.set(peer)?;
        self.start().await?;

        punch(self.transport.send_socket().as_ref(), peer, self.config.punch_count, self.config.punch_interval).await;
        Ok(())
    }

    /// Sends a message to the peer, returning its sequence number. The message is retransmitted
    ///  until it is acknowledged.
    pub async fn send(&self, payload: &str) -> anyhow::Result<u64> {
        self.engine.send(payload).await
    }

    /// Stops all background tasks and waits for them to finish. Calling this more than once
    ///  is a no-op.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let prev = std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown);

        if let Lifecycle::Running(tasks) = prev {
            info!("shutting down session");
            let _ = self.cancel_sender.send(());

            for task in tasks {
                if let Err(e) = task.await {
                    warn!("session task terminated abnormally: {}", e);
                }
            }
        }
    }
}

/// The session's receive task: a failing socket is reported as an event, since nothing awaits
///  the task until shutdown
async fn run_receive(
    recv_socket: Arc<dyn RecvSocket>,
    max_datagram_size: usize,
    engine: Arc<ReliabilityEngine>,
    event_notifier: Arc<SessionEventNotifier>,
    cancel_receiver: broadcast::Receiver<()>,
) {
    if let Err(e) = recv_loop(recv_socket.as_ref(), max_datagram_size, engine, cancel_receiver).await {
        error!("receive loop failed: {}", e);
        event_notifier.send_event(SessionEvent::ReceiveLoopFailed(e.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::discovery_server::FakeDiscoveryServer;
    use crate::test_util::dispatcher::TrackingMessageDispatcher;
    use crate::test_util::send_socket::TrackingSendSocket;
    use crate::transport::MockRecvSocket;
    use std::time::Duration;
    use tokio::time::timeout;

    fn local_config() -> SessionConfig {
        SessionConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            punch_count: 2,
            punch_interval: Duration::from_millis(10),
            retransmit_interval: Duration::from_millis(100),
            ..SessionConfig::default_ipv4()
        }
    }

    async fn local_session() -> (Session, Arc<TrackingMessageDispatcher>) {
        let dispatcher = Arc::new(TrackingMessageDispatcher::new());
        let session = Session::new(local_config(), dispatcher.clone()).await.unwrap();
        (session, dispatcher)
    }

    async fn next_event_matching(events: &mut broadcast::Receiver<SessionEvent>, f: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let evt = events.recv().await.unwrap();
                if f(&evt) {
                    return evt;
                }
            }
        }).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = SessionConfig {
            bind_addr: "[::1]:0".parse().unwrap(),
            ..local_config()
        };
        let result = Session::new(config, Arc::new(TrackingMessageDispatcher::new())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let (session, _) = local_session().await;
        assert!(session.send("hello").await.is_err());
        assert!(session.engine.pending_sequences().await.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_messages() {
        let (a, a_dispatcher) = local_session().await;
        let (b, b_dispatcher) = local_session().await;
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        let (ra, rb) = tokio::join!(a.connect(b_addr), b.connect(a_addr));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(next_event_matching(&mut a_events, |e| matches!(e, SessionEvent::PeerReachable(_))).await, SessionEvent::PeerReachable(b_addr));
        assert_eq!(next_event_matching(&mut b_events, |e| matches!(e, SessionEvent::PeerReachable(_))).await, SessionEvent::PeerReachable(a_addr));

        let sequence = a.send("hello from a").await.unwrap();
        assert_eq!(sequence, 1);

        timeout(Duration::from_secs(5), b_dispatcher.wait_for(1)).await.unwrap();
        let delivered = b_dispatcher.delivered().await;
        assert_eq!(delivered[0], (a_addr, 1, "hello from a".to_string()));

        assert_eq!(next_event_matching(&mut a_events, |e| matches!(e, SessionEvent::Acknowledged(_))).await, SessionEvent::Acknowledged(1));
        assert!(a.engine.pending_sequences().await.is_empty());

        b.send("hello from b").await.unwrap();
        timeout(Duration::from_secs(5), a_dispatcher.wait_for(1)).await.unwrap();
        assert_eq!(a_dispatcher.delivered_payloads().await, vec!["hello from b".to_string()]);

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let (a, _) = local_session().await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        a.connect(peer).await.unwrap();
        a.connect(peer).await.unwrap();
        assert!(a.connect("127.0.0.1:10".parse().unwrap()).await.is_err());
        assert_eq!(a.peer(), Some(peer));

        a.shutdown().await;
    }

    #[tokio::test]
    async fn test_discover() {
        let server = FakeDiscoveryServer::start("203.0.113.5:40001".parse().unwrap()).await.unwrap();
        let config = SessionConfig {
            discovery_servers: vec![server.addr().to_string()],
            ..local_config()
        };
        let session = Session::new(config, Arc::new(TrackingMessageDispatcher::new())).await.unwrap();

        let public_addr = session.discover().await.unwrap();
        assert_eq!(public_addr, "203.0.113.5:40001".parse().unwrap());

        session.start().await.unwrap();
        assert!(session.discover().await.is_err());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (session, _) = local_session().await;

        // shutting down a session that never started is fine
        session.shutdown().await;
        assert!(session.start().await.is_err());

        let (session, _) = local_session().await;
        session.start().await.unwrap();
        session.start().await.unwrap();
        timeout(Duration::from_secs(5), session.shutdown()).await.unwrap();
        session.shutdown().await;
        assert!(session.start().await.is_err());
    }

    #[tokio::test]
    async fn test_receive_failure_is_reported() {
        let mut recv_socket = MockRecvSocket::new();
        recv_socket.expect_recv_packet()
            .times(1)
            .returning(|_| Err(std::io::Error::new(std::io::ErrorKind::Other, "socket closed")));

        let event_notifier = Arc::new(SessionEventNotifier::new());
        let mut events = event_notifier.subscribe();
        let engine = Arc::new(ReliabilityEngine::new(
            Arc::new(local_config()),
            Arc::new(TrackingSendSocket::new()),
            PeerEndpoint::new(),
            Arc::new(TrackingMessageDispatcher::new()),
            event_notifier.clone(),
        ));

        let (cancel_sender, _) = broadcast::channel(1);
        timeout(
            Duration::from_secs(5),
            run_receive(Arc::new(recv_socket), 2048, engine, event_notifier, cancel_sender.subscribe()),
        ).await.unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::ReceiveLoopFailed(reason) => assert!(reason.contains("socket closed")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_cancel_is_not_a_failure() {
        let (session, _) = local_session().await;
        let mut events = session.subscribe();

        session.start().await.unwrap();
        session.shutdown().await;

        assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }
}
