use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use anyhow::bail;

pub const DEFAULT_DISCOVERY_SERVERS: [&str; 3] = [
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun.cloudflare.com:3478",
];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The address that the session's single UDP socket is bound to. Discovery, hole punching
    ///  and all subsequent traffic go through this socket, so that the NAT mapping learned
    ///  during discovery is the one the peer sends to.
    ///
    /// Discovery only supports IPv4, so this must be an IPv4 address.
    pub bind_addr: SocketAddr,

    /// Discovery servers as `host:port`, tried in order until one answers
    pub discovery_servers: Vec<String>,
    /// upper bound for waiting on a single discovery server's response
    pub discovery_timeout: Duration,

    /// Number of heartbeats sent to the peer when the link is initiated. Both sides must send
    ///  at roughly the same time for their NATs to accept each other's traffic, so a burst is
    ///  more robust than a single packet.
    pub punch_count: usize,
    pub punch_interval: Duration,

    pub retransmit_interval: Duration,
    /// This needs to be shorter than the idle timeout of NAT bindings along the route, which
    ///  is typically 30 seconds or more for UDP.
    pub keep_alive_interval: Duration,

    /// size of the receive buffer - longer datagrams are truncated by the OS and fail to decode,
    ///  and sending a message that does not fit is rejected
    pub max_datagram_size: usize,

    /// If present, the receiver remembers this many sequence numbers per sender and does not
    ///  deliver a retransmitted message a second time (it still acknowledges it). If absent,
    ///  delivery is at-least-once.
    pub duplicate_window: Option<usize>,

    /// If present, a message is given up on after this many transmissions (including the
    ///  initial one) without acknowledgment. If absent, messages are retransmitted until they
    ///  are acknowledged or the session ends.
    pub max_transmissions: Option<u32>,
}

impl SessionConfig {
    pub fn default_ipv4() -> SessionConfig {
        SessionConfig {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            discovery_servers: DEFAULT_DISCOVERY_SERVERS.iter()
                .map(|s| s.to_string())
                .collect(),
            discovery_timeout: Duration::from_secs(3),
            punch_count: 5,
            punch_interval: Duration::from_millis(200),
            retransmit_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(20),
            max_datagram_size: 2048,
            duplicate_window: None,
            max_transmissions: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.bind_addr.is_ipv4() {
            bail!("bind address must be IPv4, was {}", self.bind_addr);
        }
        if self.discovery_timeout.is_zero() {
            bail!("discovery timeout must be positive");
        }
        if self.retransmit_interval.is_zero() {
            bail!("retransmit interval must be positive");
        }
        if self.keep_alive_interval.is_zero() {
            bail!("keep-alive interval must be positive");
        }
        if self.max_datagram_size < 64 {
            bail!("max datagram size is too small: {}", self.max_datagram_size);
        }
        if self.duplicate_window == Some(0) {
            bail!("duplicate window must hold at least one sequence number");
        }
        if self.max_transmissions == Some(0) {
            bail!("max transmissions must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default_ipv4();
        assert!(config.validate().is_ok());
        assert_eq!(config.punch_count, 5);
        assert_eq!(config.punch_interval, Duration::from_millis(200));
        assert_eq!(config.retransmit_interval, Duration::from_secs(1));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(20));
        assert_eq!(config.discovery_timeout, Duration::from_secs(3));
        assert_eq!(config.discovery_servers[0], "stun.l.google.com:19302");
    }

    #[rstest]
    #[case::ipv6(|c: &mut SessionConfig| c.bind_addr = "[::]:0".parse().unwrap())]
    #[case::discovery_timeout(|c: &mut SessionConfig| c.discovery_timeout = Duration::ZERO)]
    #[case::retransmit(|c: &mut SessionConfig| c.retransmit_interval = Duration::ZERO)]
    #[case::keep_alive(|c: &mut SessionConfig| c.keep_alive_interval = Duration::ZERO)]
    #[case::datagram_size(|c: &mut SessionConfig| c.max_datagram_size = 10)]
    #[case::duplicate_window(|c: &mut SessionConfig| c.duplicate_window = Some(0))]
    #[case::max_transmissions(|c: &mut SessionConfig| c.max_transmissions = Some(0))]
    fn test_validate_rejects(#[case] modify: fn(&mut SessionConfig)) {
        let mut config = SessionConfig::default_ipv4();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
