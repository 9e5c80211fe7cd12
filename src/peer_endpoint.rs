use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use anyhow::{anyhow, bail, Context};
use tokio::net::lookup_host;
use tokio::sync::OnceCell;
use tracing::debug;


/// The remote peer's externally visible address. It is exchanged out of band and set once per
///  session; until then, everything directed at the peer is a no-op.
#[derive(Clone, Default)]
pub struct PeerEndpoint {
    addr: Arc<OnceCell<SocketAddr>>,
}

impl PeerEndpoint {
    pub fn new() -> PeerEndpoint {
        Default::default()
    }

    pub fn get(&self) -> Option<SocketAddr> {
        self.addr.get().cloned()
    }

    /// Setting the same address again is a no-op, changing it is an error
    pub fn set(&self, addr: SocketAddr) -> anyhow::Result<()> {
        if self.addr.set(addr).is_ok() {
            debug!("peer endpoint set to {:?}", addr);
            return Ok(());
        }

        match self.addr.get() {
            Some(prev) if *prev == addr => Ok(()),
            Some(prev) => Err(anyhow!("peer endpoint is already set to {}, cannot change it to {}", prev, addr)),
            None => Err(anyhow!("concurrent initialization of the peer endpoint")),
        }
    }
}

/// Turns the operator's input for a peer into a usable IPv4 socket address, rejecting
///  anything that could never reach a peer.
pub async fn resolve_peer(host: &str, port: &str) -> anyhow::Result<SocketAddr> {
    let host = host.trim();
    let port = port.trim();

    if host.is_empty() {
        bail!("peer IP must not be empty");
    }

    let port: u16 = port.parse()
        .with_context(|| format!("invalid peer port '{}'", port))?;
    if port == 0 {
        bail!("peer port must not be 0");
    }

    let ip = match host.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => {
            let resolved = lookup_host((host, port)).await
                .with_context(|| format!("could not resolve peer host '{}'", host))?
                .find(|a| a.is_ipv4())
                .ok_or_else(|| anyhow!("peer host '{}' has no IPv4 address", host))?;
            resolved.ip()
        }
    };

    match ip {
        IpAddr::V6(_) => bail!("peer address {} is IPv6 - only IPv4 is supported", ip),
        IpAddr::V4(v4) if v4.is_unspecified() || v4.is_broadcast() || v4.is_multicast() => {
            bail!("peer address {} cannot be used for a unicast link", ip)
        }
        IpAddr::V4(_) => Ok(SocketAddr::new(ip, port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_peer_endpoint_unset() {
        let peer = PeerEndpoint::new();
        assert_eq!(peer.get(), None);
    }

    #[test]
    fn test_peer_endpoint_set_once() {
        let peer = PeerEndpoint::new();
        let cloned = peer.clone();
        let addr: SocketAddr = "203.0.113.7:40000".parse().unwrap();

        peer.set(addr).unwrap();
        assert_eq!(cloned.get(), Some(addr));

        assert!(peer.set(addr).is_ok());
        assert!(peer.set("203.0.113.8:40000".parse().unwrap()).is_err());
        assert_eq!(peer.get(), Some(addr));
    }

    #[rstest]
    #[case::plain("203.0.113.7", "40000", "203.0.113.7:40000")]
    #[case::whitespace(" 198.51.100.1 \n", " 5000\n", "198.51.100.1:5000")]
    #[case::localhost_ip("127.0.0.1", "1", "127.0.0.1:1")]
    #[tokio::test]
    async fn test_resolve_peer(#[case] host: &str, #[case] port: &str, #[case] expected: &str) {
        let actual = resolve_peer(host, port).await.unwrap();
        assert_eq!(actual, expected.parse::<SocketAddr>().unwrap());
    }

    #[rstest]
    #[case::empty_host("", "40000")]
    #[case::empty_port("203.0.113.7", "")]
    #[case::port_not_a_number("203.0.113.7", "abc")]
    #[case::port_too_big("203.0.113.7", "70000")]
    #[case::port_zero("203.0.113.7", "0")]
    #[case::ipv6("::1", "40000")]
    #[case::unspecified("0.0.0.0", "40000")]
    #[case::broadcast("255.255.255.255", "40000")]
    #[case::multicast("224.0.0.1", "40000")]
    #[case::unresolvable("no-such-host.invalid", "40000")]
    #[tokio::test]
    async fn test_resolve_peer_rejects(#[case] host: &str, #[case] port: &str) {
        assert!(resolve_peer(host, port).await.is_err());
    }
}
