//! Server lifecycle: construction, runner group and shutdown.
//!
//! `listen_and_serve` binds one TCP listener and one UDP socket on the same
//! address and drives both loops concurrently; the server terminates when
//! either loop returns or when `shutdown` cancels them. Cancellation drops
//! the listener futures, which closes both listeners and lets per-connection
//! tasks drain as their sockets close.

use dashmap::DashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::authman::Authman;
use crate::dialer::{Dialer, NetDialer};
use crate::error::{Error, Result};
use crate::logger::log;
use crate::udp::{FlowKey, PinnedSource, UdpExchange};
use crate::{tcp, udp};

const TCP_BACKLOG: i32 = 1024;

/// State shared by the listener loops and every per-connection task.
pub(crate) struct Shared {
    pub(crate) password: Vec<u8>,
    pub(crate) tcp_timeout: Duration,
    pub(crate) udp_timeout: Duration,
    pub(crate) authman: Option<Arc<dyn Authman>>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) exchanges: Arc<DashMap<FlowKey, Arc<UdpExchange>>>,
    pub(crate) udp_src: Arc<DashMap<FlowKey, PinnedSource>>,
}

/// Encrypted TCP/UDP relay server.
pub struct Server {
    listen: SocketAddr,
    password: Vec<u8>,
    tcp_timeout: Duration,
    udp_timeout: Duration,
    authman: Option<Arc<dyn Authman>>,
    dialer: Arc<dyn Dialer>,
    exchanges: Arc<DashMap<FlowKey, Arc<UdpExchange>>>,
    udp_src: Arc<DashMap<FlowKey, PinnedSource>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.listen)
            .field("tcp_timeout", &self.tcp_timeout)
            .field("udp_timeout", &self.udp_timeout)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Resolve the listen address and build a server. The timeouts are
    /// rolling idle deadlines; zero disables them.
    pub fn new(
        addr: &str,
        password: &str,
        tcp_timeout: Duration,
        udp_timeout: Duration,
    ) -> Result<Self> {
        let listen = addr
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("malformed listen address {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("listen address {} resolves to nothing", addr)))?;
        Ok(Self {
            listen,
            password: password.as_bytes().to_vec(),
            tcp_timeout,
            udp_timeout,
            authman: None,
            dialer: Arc::new(NetDialer::new()),
            exchanges: Arc::new(DashMap::new()),
            udp_src: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Install the authentication/accounting plugin. Call before
    /// `listen_and_serve`.
    pub fn set_authman(&mut self, authman: Arc<dyn Authman>) {
        self.authman = Some(authman);
    }

    /// Replace the outbound dialer. Call before `listen_and_serve`.
    pub fn set_dialer(&mut self, dialer: Arc<dyn Dialer>) {
        self.dialer = dialer;
    }

    /// Bind both listeners and serve until one of them fails or `shutdown`
    /// is called.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let (tcp_listener, udp_listener) = self.bind().await?;
        self.serve_with(tcp_listener, udp_listener).await
    }

    /// Stop both listeners. Idempotent; in-flight connections drain as
    /// their sockets close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn bind(&self) -> Result<(TcpListener, Arc<UdpSocket>)> {
        let tcp_listener = bind_tcp(self.listen)?;
        let udp_listener = Arc::new(UdpSocket::bind(self.listen).await?);
        Ok((tcp_listener, udp_listener))
    }

    async fn serve_with(
        &self,
        tcp_listener: TcpListener,
        udp_listener: Arc<UdpSocket>,
    ) -> Result<()> {
        let shared = Arc::new(Shared {
            password: self.password.clone(),
            tcp_timeout: self.tcp_timeout,
            udp_timeout: self.udp_timeout,
            authman: self.authman.clone(),
            dialer: Arc::clone(&self.dialer),
            exchanges: Arc::clone(&self.exchanges),
            udp_src: Arc::clone(&self.udp_src),
        });

        log::info!(
            address = %tcp_listener.local_addr()?,
            tcp_timeout = ?self.tcp_timeout,
            udp_timeout = ?self.udp_timeout,
            authman = self.authman.is_some(),
            "Server started"
        );

        let sweeper = tokio::spawn(udp::sweep_source_pins(Arc::clone(&shared)));
        let result = tokio::select! {
            r = tcp::serve(Arc::clone(&shared), tcp_listener) => r,
            r = udp::serve(Arc::clone(&shared), udp_listener) => r,
            _ = self.shutdown.cancelled() => Ok(()),
        };
        sweeper.abort();

        log::info!("Server stopped");
        result
    }
}

/// TCP listener with `SO_REUSEADDR` so restarts skip `TIME_WAIT`.
fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(TCP_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into())?)
}
