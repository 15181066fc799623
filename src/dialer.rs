//! Outbound dialer capability.
//!
//! The relay never opens outbound sockets directly; it goes through a
//! [`Dialer`] passed at construction so embedders control resolution and
//! tests can substitute loopback or in-memory transports.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};

use crate::address::Address;
use crate::error::{Error, Result};

const TCP_CONNECT_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a TCP connection to the destination.
    async fn dial_tcp(&self, addr: &Address) -> Result<TcpStream>;

    /// Open a connected UDP socket to the destination, bound to `local`
    /// when a source pin exists. A bind conflict surfaces as
    /// `io::ErrorKind::AddrInUse` for the caller to classify.
    async fn dial_udp(&self, local: Option<SocketAddr>, remote: &Address) -> Result<UdpSocket>;
}

/// Default dialer backed by the host network stack.
pub struct NetDialer {
    connect_timeout: Duration,
}

impl NetDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl Default for NetDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for NetDialer {
    async fn dial_tcp(&self, addr: &Address) -> Result<TcpStream> {
        let remote = addr.to_socket_addr().await?;
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| Error::Network(format!("connect timeout to {}", addr)))??;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    async fn dial_udp(&self, local: Option<SocketAddr>, remote: &Address) -> Result<UdpSocket> {
        let remote = remote.to_socket_addr().await?;
        let bind_addr = local.unwrap_or_else(|| unspecified_for(&remote));
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(remote).await?;
        Ok(socket)
    }
}

/// The wildcard bind address in the same family as `remote`.
fn unspecified_for(remote: &SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}
