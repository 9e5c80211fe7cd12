//! Discovery of the session socket's public address through a STUN binding request (RFC 5389
//!  message format, only the parts needed for that).
//!
//! Request (20 bytes, network byte order):
//!
//! ```ascii
//!  0: message type (u16) - 0x0001 binding request
//!  2: message length (u16) - 0, there are no attributes
//!  4: magic cookie (u32) - 0x2112A442
//!  8: transaction id (12 random bytes)
//! ```
//!
//! The response has the same header with message type 0x0101 (binding success), followed by
//!  TLV attributes padded to multiples of 4 bytes. The one we need is XOR-MAPPED-ADDRESS
//!  (0x0020):
//!
//! ```ascii
//!  0: attribute type (u16) - 0x0020
//!  2: attribute length (u16)
//!  4: reserved (u8)
//!  5: address family (u8) - 0x01 for IPv4
//!  6: port (u16) XOR the upper 16 bits of the magic cookie
//!  8: IPv4 address (4 bytes) XOR the magic cookie's bytes
//! ```
//!
//! The XOR obfuscation keeps NATs from 'helpfully' rewriting addresses they find in payloads.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, bail, Context};
use bytes::{Buf, BufMut, BytesMut};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::util::random::{Random, RngRandom};

pub const MAGIC_COOKIE: u32 = 0x2112_A442;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS_RESPONSE: u16 = 0x0101;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const FAMILY_IPV4: u8 = 0x01;
const HEADER_LEN: usize = 20;

pub type TransactionId = [u8; 12];

pub fn binding_request<R: Random>() -> (TransactionId, BytesMut) {
    let mut transaction_id = [0u8; 12];
    R::fill_bytes(&mut transaction_id);

    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u16(BINDING_REQUEST);
    buf.put_u16(0);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(&transaction_id);

    (transaction_id, buf)
}

/// Builds the binding success response that a discovery server sends for `public_addr`
pub fn binding_response(transaction_id: &TransactionId, public_addr: SocketAddrV4) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 12);
    buf.put_u16(BINDING_SUCCESS_RESPONSE);
    buf.put_u16(12);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(transaction_id);

    buf.put_u16(ATTR_XOR_MAPPED_ADDRESS);
    buf.put_u16(8);
    buf.put_u8(0);
    buf.put_u8(FAMILY_IPV4);
    buf.put_u16(public_addr.port() ^ (MAGIC_COOKIE >> 16) as u16);
    buf.put_u32(u32::from(*public_addr.ip()) ^ MAGIC_COOKIE);
    buf
}

/// Checks that the response answers our request, and extracts the public address from it
pub fn parse_binding_response(response: &[u8], transaction_id: &TransactionId) -> anyhow::Result<SocketAddrV4> {
    if response.len() < HEADER_LEN {
        bail!("response is too short for a STUN header: {} bytes", response.len());
    }

    let mut header = &response[..HEADER_LEN];
    let message_type = header.get_u16();
    let message_len = header.get_u16() as usize;
    let cookie = header.get_u32();

    if message_type != BINDING_SUCCESS_RESPONSE {
        bail!("not a binding success response: message type 0x{:04X}", message_type);
    }
    if cookie != MAGIC_COOKIE {
        bail!("wrong magic cookie 0x{:08X}", cookie);
    }
    if header != transaction_id {
        bail!("transaction id does not match the request");
    }

    let attributes = response.get(HEADER_LEN..HEADER_LEN + message_len)
        .ok_or_else(|| anyhow!("message length {} exceeds the response", message_len))?;

    let value = find_attribute(attributes, ATTR_XOR_MAPPED_ADDRESS)?
        .ok_or_else(|| anyhow!("could not find XOR-MAPPED-ADDRESS in response"))?;

    decode_xor_mapped_address(value)
}

fn find_attribute(mut attributes: &[u8], wanted: u16) -> anyhow::Result<Option<&[u8]>> {
    while attributes.len() >= 4 {
        let attr_type = attributes.get_u16();
        let attr_len = attributes.get_u16() as usize;

        if attributes.len() < attr_len {
            bail!("attribute 0x{:04X} with length {} exceeds the response", attr_type, attr_len);
        }
        if attr_type == wanted {
            return Ok(Some(&attributes[..attr_len]));
        }

        trace!("skipping STUN attribute 0x{:04X}", attr_type);
        let padded_len = (attr_len + 3) & !3;
        attributes = attributes.get(padded_len..).unwrap_or(&[]);
    }
    Ok(None)
}

/// decodes the value part of an XOR-MAPPED-ADDRESS attribute, i.e. starting *after* type and length
pub fn decode_xor_mapped_address(mut value: &[u8]) -> anyhow::Result<SocketAddrV4> {
    if value.len() < 8 {
        bail!("XOR-MAPPED-ADDRESS is too short: {} bytes", value.len());
    }

    let _reserved = value.get_u8();
    let family = value.get_u8();
    if family != FAMILY_IPV4 {
        bail!("unsupported address family 0x{:02X} - only IPv4 is supported", family);
    }

    let port = value.get_u16() ^ (MAGIC_COOKIE >> 16) as u16;
    let ip = Ipv4Addr::from(value.get_u32() ^ MAGIC_COOKIE);

    Ok(SocketAddrV4::new(ip, port))
}


/// Runs the discovery handshake on the session's socket. This must happen before the session's
///  receive loop is started, because the response arrives on the same socket.
pub struct DiscoveryClient {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
}

impl DiscoveryClient {
    pub fn new(socket: Arc<UdpSocket>, max_datagram_size: usize) -> DiscoveryClient {
        DiscoveryClient {
            socket,
            max_datagram_size,
        }
    }

    /// Sends a binding request to `server` and waits up to `timeout` for the matching response.
    ///  Datagrams that are not the response are skipped.
    ///
    /// NB: The timeout applies to this call only, the socket itself has no read timeout
    pub async fn discover(&self, server: SocketAddr, timeout: Duration) -> anyhow::Result<SocketAddrV4> {
        let (transaction_id, request) = binding_request::<RngRandom>();

        debug!("sending binding request to {:?}", server);
        self.socket.send_to(&request, server).await
            .with_context(|| format!("error sending binding request to {}", server))?;

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.max_datagram_size];
        loop {
            let (num_read, from) = timeout_at(deadline, self.socket.recv_from(&mut buf)).await
                .map_err(|_| anyhow!("no response from discovery server {} within {:?}", server, timeout))?
                .with_context(|| format!("error receiving response from discovery server {}", server))?;

            if from != server {
                debug!("received datagram from {:?} while waiting for discovery response - ignoring", from);
                continue;
            }

            match parse_binding_response(&buf[..num_read], &transaction_id) {
                Ok(public_addr) => {
                    info!("discovery server {:?} reports public address {:?}", server, public_addr);
                    return Ok(public_addr);
                }
                Err(e) => debug!("ignoring datagram from discovery server {:?}: {}", server, e),
            }
        }
    }

    /// Tries the servers in turn, returning the first public address that is discovered. Server
    ///  names are resolved to their first IPv4 address.
    pub async fn discover_any(&self, servers: &[String], timeout: Duration) -> anyhow::Result<SocketAddrV4> {
        let mut last_error = anyhow!("no discovery servers are configured");

        for server in servers {
            let result = match resolve_server(server).await {
                Ok(addr) => self.discover(addr, timeout).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(public_addr) => return Ok(public_addr),
                Err(e) => {
                    warn!("discovery via {} failed: {:#}", server, e);
                    last_error = e;
                }
            }
        }

        Err(last_error.context("public address discovery failed"))
    }
}

async fn resolve_server(server: &str) -> anyhow::Result<SocketAddr> {
    lookup_host(server).await
        .with_context(|| format!("could not resolve discovery server {}", server))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| anyhow!("discovery server {} has no IPv4 address", server))
}
