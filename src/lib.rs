//! A point-to-point messaging link between two hosts that are both behind NATs, over a single
//!  UDP socket and without a relay.
//!
//! ## Establishing the link
//!
//! * Each side binds one UDP socket and asks a public discovery server (STUN) which address and
//!   port that socket is visible as from the outside (see [discovery])
//! * The public addresses are exchanged out of band, e.g. by phone or chat
//! * Both sides send a burst of heartbeats to each other at roughly the same time, so that
//!   each side's NAT has an outbound mapping that the other side's packets match (see
//!   [hole_punch])
//! * From then on, heartbeats at a fixed interval keep the NAT mappings alive (see [keep_alive])
//!
//! All of this goes through the same socket: a different socket would get a different NAT
//!  mapping, and the address exchanged with the peer would be wrong.
//!
//! ## Packets
//!
//! Once the link is open, peers exchange heartbeats, messages and acknowledgments in a small
//!  binary format (see [packet]).
//!
//! ## Delivery
//!
//! Messages are acknowledged by the receiver and retransmitted by the sender at a fixed interval
//!  until the acknowledgment arrives (see [reliability]). Delivery is at-least-once and
//!  unordered, with optional duplicate suppression on the receiving side. There is no
//!  congestion control and no encryption.

pub mod config;
pub mod discovery;
pub mod hole_punch;
pub mod keep_alive;
pub mod message_dispatcher;
pub mod packet;
pub mod peer_endpoint;
pub mod reliability;
pub mod session;
pub mod session_events;
pub mod transport;
pub mod util;
pub mod test_util;
