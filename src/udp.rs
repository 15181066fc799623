//! UDP side of the relay: per-flow demultiplexer with source-port pinning.
//!
//! Every datagram is an independently sealed blob. The first datagram of a
//! flow (client address, destination) dials an outbound socket and publishes
//! an exchange in the flow table; later datagrams of the flow reuse it. A
//! reader task owns the exchange and tears it down when the outbound read
//! deadline fires, so there is no separate expiry timer for exchanges.
//!
//! The local address of the first dial is pinned per flow. When the flow is
//! re-created after expiry the pin is handed back to the dialer, so the
//! remote keeps seeing a stable source address across exchange lifetimes.

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use crate::address::Address;
use crate::authman::{Internet, Protocol};
use crate::error::{Error, Result};
use crate::logger::log;
use crate::packet;
use crate::server::Shared;
use crate::utils::with_deadline;

/// Largest datagram the listener accepts.
const MAX_DATAGRAM: usize = 65535;

/// How long an unused source pin survives before the sweeper drops it.
const SOURCE_PIN_TTL: Duration = Duration::from_secs(30 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Flow identity: one exchange per (client, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FlowKey {
    pub(crate) client: SocketAddr,
    pub(crate) dst: Address,
}

/// Live relay state for one flow. Owned by its reader task; the flow table
/// holds a lookup handle the reader removes on exit.
pub(crate) struct UdpExchange {
    pub(crate) client: SocketAddr,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) internet: Option<Arc<dyn Internet>>,
}

/// Local address a flow previously dialed from.
pub(crate) struct PinnedSource {
    pub(crate) addr: SocketAddr,
    last_used: Instant,
}

impl PinnedSource {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            last_used: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.last_used.elapsed() > ttl
    }
}

/// Listener loop. Read errors on the listener socket terminate the server;
/// per-datagram errors are logged and swallowed.
pub(crate) async fn serve(shared: Arc<Shared>, listener: Arc<UdpSocket>) -> Result<()> {
    loop {
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM);
        let (n, peer) = listener.recv_from(&mut buf[..]).await?;
        let datagram = buf.split_to(n).freeze();

        let shared = Arc::clone(&shared);
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            match handle_datagram(shared, listener, peer, datagram).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => log::debug!(peer = %peer, error = %e, "Datagram dropped"),
            }
        });
    }
}

async fn handle_datagram(
    shared: Arc<Shared>,
    listener: Arc<UdpSocket>,
    peer: SocketAddr,
    datagram: Bytes,
) -> Result<()> {
    let (dst, data) = packet::decrypt(&shared.password, &datagram)?;
    let key = FlowKey { client: peer, dst };

    // Fast path: the flow already has an exchange.
    if let Some(entry) = shared.exchanges.get(&key) {
        let exchange = Arc::clone(entry.value());
        drop(entry);
        return forward(&shared, &exchange, &data).await;
    }

    let mut internet: Option<Arc<dyn Internet>> = None;
    if let Some(authman) = &shared.authman {
        let (prefix, token) = packet::split_token(&data)?;
        let handle = authman
            .verify_token(token, Protocol::Udp, key.dst.atyp(), &key.dst.to_string(), Some(prefix))
            .await?;
        internet = Some(handle);
    }

    let pinned = shared.udp_src.get_mut(&key).map(|mut pin| {
        pin.touch();
        pin.addr
    });

    log::debug!(target = %key.dst, "dial udp");
    let socket = match shared.dialer.dial_udp(pinned, &key.dst).await {
        Ok(socket) => socket,
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::AddrInUse => {
            // Another in-flight datagram of this flow won the dial race.
            if let Some(ai) = internet {
                ai.close();
            }
            return Err(Error::AddrInUse);
        }
        Err(e) => {
            if let Some(ai) = internet {
                ai.close();
            }
            return Err(e);
        }
    };

    if pinned.is_none() {
        if let Ok(local) = socket.local_addr() {
            shared.udp_src.insert(key.clone(), PinnedSource::new(local));
        }
    }

    let exchange = Arc::new(UdpExchange {
        client: peer,
        socket: Arc::new(socket),
        internet,
    });

    // First datagram goes out before the exchange is published; a failure
    // here tears everything down without inserting.
    if let Err(e) = forward(&shared, &exchange, &data).await {
        if let Some(ai) = &exchange.internet {
            ai.close();
        }
        return Err(e);
    }

    match shared.exchanges.entry(key.clone()) {
        Entry::Occupied(_) => {
            // Lost the publish race after dialing; the winner carries the
            // flow and our socket closes on drop.
            if let Some(ai) = &exchange.internet {
                ai.close();
            }
            return Ok(());
        }
        Entry::Vacant(slot) => {
            slot.insert(Arc::clone(&exchange));
        }
    }

    tokio::spawn(relay_back(shared, listener, key, exchange));
    Ok(())
}

/// Write one client datagram to the flow's outbound socket, stripping the
/// token trailer when an authman is installed.
async fn forward(shared: &Shared, exchange: &UdpExchange, data: &[u8]) -> Result<()> {
    let payload = if shared.authman.is_some() {
        packet::split_token(data)?.0
    } else {
        data
    };
    let n = exchange.socket.send(payload).await?;
    if let Some(ai) = &exchange.internet {
        ai.udp_egress(n)?;
    }
    Ok(())
}

/// Per-exchange reader: relays remote datagrams back to the client until the
/// outbound read deadline fires or an error ends the flow, then removes the
/// exchange and closes the accounting session.
async fn relay_back(
    shared: Arc<Shared>,
    listener: Arc<UdpSocket>,
    key: FlowKey,
    exchange: Arc<UdpExchange>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        // Expiry is driven entirely by this read deadline.
        let n = match with_deadline(shared.udp_timeout, async {
            Ok(exchange.socket.recv(&mut buf).await?)
        })
        .await
        {
            Ok(n) => n,
            Err(_) => break,
        };

        let mut plaintext = Vec::with_capacity(key.dst.encoded_size() + n);
        key.dst.encode(&mut plaintext);
        plaintext.extend_from_slice(&buf[..n]);

        let sealed = match packet::encrypt(&shared.password, &plaintext) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::warn!(error = %e, "Failed to seal reply datagram");
                break;
            }
        };
        let written = match listener.send_to(&sealed, exchange.client).await {
            Ok(written) => written,
            Err(_) => break,
        };
        if let Some(ai) = &exchange.internet {
            if ai.udp_egress(written).is_err() {
                break;
            }
        }
    }

    shared.exchanges.remove(&key);
    if let Some(ai) = &exchange.internet {
        ai.close();
    }
    // Last handle: dropping it closes the outbound socket, freeing the
    // pinned port for the flow's next incarnation.
    drop(exchange);
}

/// Background sweep of idle source pins. The exchange table needs no sweep:
/// its reader tasks remove their own entries.
pub(crate) async fn sweep_source_pins(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let before = shared.udp_src.len();
        shared.udp_src.retain(|_, pin| !pin.expired(SOURCE_PIN_TTL));
        // dials may insert concurrently, so the count is best-effort
        let removed = before.saturating_sub(shared.udp_src.len());
        if removed > 0 {
            log::debug!(
                removed,
                remaining = shared.udp_src.len(),
                "Swept idle source pins"
            );
        }
    }
}
