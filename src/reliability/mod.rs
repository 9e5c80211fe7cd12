//! At-least-once delivery of messages on top of raw datagrams.
//!
//! Every outbound message gets the next sequence number and stays in the pending table until
//!  an acknowledgment with that sequence number arrives. The retransmit loop resends all pending
//!  messages at a fixed interval - there is no backoff, and by default there is no upper limit,
//!  so an unreachable peer causes retransmission for the life of the session.
//!
//! The receiving side acknowledges every message it gets, including retransmitted ones, because
//!  the retransmission may be caused by a lost acknowledgment. It does not track sequence
//!  numbers unless a duplicate window is configured, so a message can be delivered to the
//!  application more than once. The duplicate window only covers messages from the configured
//!  peer; anything else is delivered at-least-once regardless.

mod duplicate_window;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::message_dispatcher::MessageDispatcher;
use crate::packet::{Packet, PacketKind};
use crate::peer_endpoint::PeerEndpoint;
use crate::reliability::duplicate_window::DuplicateWindow;
use crate::session_events::{SessionEvent, SessionEventNotifier};
use crate::transport::{PacketHandler, SendSocket};


/// An outbound message waiting for its acknowledgment
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub sequence: u64,
    pub encoded: Bytes,
    pub destination: SocketAddr,
    /// number of times the message was sent, including the initial send
    pub transmissions: u32,
}

struct EngineState {
    next_sequence: u64,
    pending: BTreeMap<u64, PendingSend>,
    duplicate_window: Option<DuplicateWindow>,
    peer_last_seen: Option<Instant>,
}

pub struct ReliabilityEngine {
    config: Arc<SessionConfig>,
    send_socket: Arc<dyn SendSocket>,
    peer: PeerEndpoint,
    message_dispatcher: Arc<dyn MessageDispatcher>,
    event_notifier: Arc<SessionEventNotifier>,
    state: Mutex<EngineState>,
}

impl ReliabilityEngine {
    pub fn new(
        config: Arc<SessionConfig>,
        send_socket: Arc<dyn SendSocket>,
        peer: PeerEndpoint,
        message_dispatcher: Arc<dyn MessageDispatcher>,
        event_notifier: Arc<SessionEventNotifier>,
    ) -> ReliabilityEngine {
        let state = EngineState {
            next_sequence: 1,
            pending: BTreeMap::default(),
            duplicate_window: config.duplicate_window.map(DuplicateWindow::new),
            peer_last_seen: None,
        };

        ReliabilityEngine {
            config,
            send_socket,
            peer,
            message_dispatcher,
            event_notifier,
            state: Mutex::new(state),
        }
    }

    /// Assigns the next sequence number to a message, registers it as pending and sends it to
    ///  the peer. Sending requires a configured peer.
    pub async fn send(&self, payload: &str) -> anyhow::Result<u64> {
        let peer = self.peer.get()
            .ok_or_else(|| anyhow!("no peer is configured - cannot send"))?;

        let (sequence, encoded) = {
            let mut state = self.state.lock().await;

            let sequence = state.next_sequence;
            let encoded = Packet::message(sequence, payload).to_bytes().freeze();
            if encoded.len() > self.config.max_datagram_size {
                bail!("message of {} bytes exceeds the maximum datagram size of {} bytes", encoded.len(), self.config.max_datagram_size);
            }

            state.next_sequence = sequence.checked_add(1)
                .ok_or_else(|| anyhow!("sequence numbers are exhausted for this session"))?;
            state.pending.insert(sequence, PendingSend {
                sequence,
                encoded: encoded.clone(),
                destination: peer,
                transmissions: 1,
            });
            (sequence, encoded)
        };

        debug!("sending message #{} to {:?}", sequence, peer);
        self.send_socket.do_send_packet(peer, &encoded).await;
        Ok(sequence)
    }

    pub async fn on_receive(&self, packet: Packet, from: SocketAddr) {
        self.register_peer_activity(from).await;

        match packet.kind {
            PacketKind::Heartbeat => {
                trace!("received heartbeat from {:?}", from);
            }
            PacketKind::Acknowledgment => {
                let removed = self.state.lock().await
                    .pending
                    .remove(&packet.sequence);

                if removed.is_some() {
                    debug!("message #{} was acknowledged by {:?}", packet.sequence, from);
                    self.event_notifier.send_event(SessionEvent::Acknowledged(packet.sequence));
                }
                else {
                    trace!("received acknowledgment for message #{} that is not pending - ignoring", packet.sequence);
                }
            }
            PacketKind::Message => {
                // acknowledge unconditionally: a duplicate is most likely caused by a lost ack
                self.send_socket
                    .do_send_packet(from, &Packet::acknowledgment(packet.sequence).to_bytes())
                    .await;

                let is_new = match &mut self.state.lock().await.duplicate_window {
                    Some(window) if self.peer.get() == Some(from) => window.insert(packet.sequence),
                    _ => true,
                };
                if !is_new {
                    debug!("message #{} from {:?} was delivered before - skipping", packet.sequence, from);
                    return;
                }

                self.message_dispatcher.on_message(from, packet.sequence, &packet.payload).await;
            }
        }
    }

    async fn register_peer_activity(&self, from: SocketAddr) {
        if self.peer.get() != Some(from) {
            return;
        }

        let first_contact = {
            let mut state = self.state.lock().await;
            state.peer_last_seen.replace(Instant::now()).is_none()
        };

        if first_contact {
            info!("first packet from peer {:?} - link is open", from);
            self.event_notifier.send_event(SessionEvent::PeerReachable(from));
        }
    }

    /// Resends every pending message. Messages that used up the configured maximum number of
    ///  transmissions are dropped instead, and reported as failed.
    ///
    /// NB: The lock is released before any packets are sent
    pub async fn retransmit_tick(&self) {
        let (to_resend, failed) = {
            let mut state = self.state.lock().await;

            let mut failed = Vec::new();
            if let Some(max_transmissions) = self.config.max_transmissions {
                state.pending.retain(|&sequence, p| {
                    if p.transmissions >= max_transmissions {
                        failed.push(sequence);
                        false
                    }
                    else {
                        true
                    }
                });
            }

            let to_resend = state.pending.values_mut()
                .map(|p| {
                    p.transmissions = p.transmissions.saturating_add(1);
                    (p.sequence, p.destination, p.encoded.clone())
                })
                .collect::<Vec<_>>();

            (to_resend, failed)
        };

        for sequence in failed {
            warn!("message #{} was not acknowledged after {:?} transmissions - giving up", sequence, self.config.max_transmissions);
            self.event_notifier.send_event(SessionEvent::DeliveryFailed(sequence));
        }

        for (sequence, destination, encoded) in to_resend {
            trace!("retransmitting message #{} to {:?}", sequence, destination);
            self.send_socket.do_send_packet(destination, &encoded).await;
        }
    }

    #[cfg(test)]
    pub async fn pending_sequences(&self) -> Vec<u64> {
        self.state.lock().await
            .pending
            .keys()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn peer_last_seen(&self) -> Option<Instant> {
        self.state.lock().await.peer_last_seen
    }
}

#[async_trait]
impl PacketHandler for ReliabilityEngine {
    async fn on_packet(&self, packet: Packet, from: SocketAddr) {
        self.on_receive(packet, from).await
    }
}

pub async fn run_retransmit_loop(engine: Arc<ReliabilityEngine>, mut cancel_receiver: broadcast::Receiver<()>) {
    let period = engine.config.retransmit_interval;
    let mut ticks = time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => engine.retransmit_tick().await,
            _ = cancel_receiver.recv() => {
                debug!("retransmit loop canceled");
                return;
            }
        }
    }
}
