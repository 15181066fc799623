//! TCP side of the relay: accept loop, handshake, full-duplex framed copy.
//!
//! Handshake: 12-byte client nonce, one record carrying the destination
//! address triple, and one token record when an authman is installed. After
//! the outbound dial the two directions run as sibling futures; either one
//! ending (EOF, deadline, authentication failure, write failure) drops the
//! other and both sockets close with it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::address::Address;
use crate::authman::{Internet, Protocol};
use crate::crypto::NONCE_SIZE;
use crate::error::Result;
use crate::framer::{RecordReader, RecordWriter, MAX_RECORD_PAYLOAD};
use crate::logger::log;
use crate::server::Shared;
use crate::utils::with_deadline;

/// Accept loop. Listener-level errors terminate the server; per-connection
/// errors are logged and swallowed.
pub(crate) async fn serve(shared: Arc<Shared>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        log::connection(&peer.to_string(), "new");

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            if let Err(e) = handle(shared, stream, peer).await {
                log::debug!(peer = %peer, error = %e, "Connection ended");
            }
            log::connection(&peer.to_string(), "closed");
        });
    }
}

async fn handle(shared: Arc<Shared>, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let deadline = shared.tcp_timeout;

    let mut client_nonce = [0u8; NONCE_SIZE];
    with_deadline(deadline, async {
        stream.read_exact(&mut client_nonce).await?;
        Ok(())
    })
    .await?;

    let (client_read, client_write) = stream.into_split();
    let mut records = RecordReader::new(client_read, &shared.password, client_nonce);

    let addr_record = with_deadline(deadline, records.read_record()).await?;
    let (dst, _) = Address::decode(&addr_record)?;

    let mut internet: Option<Arc<dyn Internet>> = None;
    if let Some(authman) = &shared.authman {
        let token = with_deadline(deadline, records.read_record()).await?;
        let verified = authman
            .verify_token(&token, Protocol::Tcp, dst.atyp(), &dst.to_string(), None)
            .await;
        match verified {
            Ok(handle) => {
                log::authentication(&peer.to_string(), true);
                internet = Some(handle);
            }
            Err(e) => {
                log::authentication(&peer.to_string(), false);
                return Err(e);
            }
        }
    }

    // Accounting session ends exactly once, however the connection ends;
    // the guard must cover a failed dial as well.
    let _close_guard = internet
        .clone()
        .map(|ai| scopeguard::guard(ai, |ai| ai.close()));

    log::debug!(target = %dst, "dial tcp");
    let remote = shared.dialer.dial_tcp(&dst).await?;
    let (mut remote_read, mut remote_write) = remote.into_split();

    let password = shared.password.clone();
    let downstream_internet = internet.clone();

    // remote -> client, framed under a fresh server nonce. The 12 handshake
    // bytes count toward egress like any other write to the client.
    let downstream = async move {
        let mut writer =
            with_deadline(deadline, RecordWriter::negotiate(client_write, &password)).await?;
        if let Some(ai) = &downstream_internet {
            ai.tcp_egress(NONCE_SIZE)?;
        }
        let mut buf = [0u8; MAX_RECORD_PAYLOAD];
        loop {
            let n = with_deadline(deadline, async {
                Ok(remote_read.read(&mut buf).await?)
            })
            .await?;
            if n == 0 {
                return Ok(());
            }
            let written = with_deadline(deadline, writer.write_record(&buf[..n])).await?;
            if let Some(ai) = &downstream_internet {
                ai.tcp_egress(written)?;
            }
        }
    };

    let upstream_internet = internet;

    // client -> remote: deframe records and forward the plaintext.
    let upstream = async move {
        loop {
            let plaintext = with_deadline(deadline, records.read_record()).await?;
            with_deadline(deadline, async {
                remote_write.write_all(&plaintext).await?;
                Ok(())
            })
            .await?;
            if let Some(ai) = &upstream_internet {
                ai.tcp_egress(plaintext.len())?;
            }
        }
    };

    // Either direction ending drops the other future here; its socket
    // halves close with it.
    tokio::select! {
        r = downstream => r,
        r = upstream => r,
    }
}
