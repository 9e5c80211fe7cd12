use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::discovery::{binding_response, TransactionId};


/// A discovery server on localhost that answers every binding request with the same public
///  address. It stops when it is dropped.
pub struct FakeDiscoveryServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeDiscoveryServer {
    pub async fn start(public_addr: SocketAddrV4) -> anyhow::Result<FakeDiscoveryServer> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((num_read, from)) = socket.recv_from(&mut buf).await {
                if num_read < 20 {
                    continue;
                }

                let mut transaction_id: TransactionId = [0; 12];
                transaction_id.copy_from_slice(&buf[8..20]);

                debug!("fake discovery server: answering request from {:?}", from);
                let _ = socket.send_to(&binding_response(&transaction_id, public_addr), from).await;
            }
        });

        Ok(FakeDiscoveryServer {
            addr,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for FakeDiscoveryServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
