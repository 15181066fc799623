//! AEAD record framing for the TCP stream protocol.
//!
//! Once the 12-byte handshake nonce has been exchanged, each record on the
//! wire is:
//!
//! ```text
//! sealed(len_be16)        2 + 16 bytes, under the current nonce
//! sealed(payload)         len + 16 bytes, under the incremented nonce
//! ```
//!
//! The nonce advances again after the payload, so a value is never reused
//! under the same key. The very first sealed length uses the handshake
//! nonce unmodified; everything after continues the evolving counter.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{self, Nonce, SealingKey, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// Maximum plaintext bytes in one record. Larger payloads are split by the
/// writer's caller.
pub const MAX_RECORD_PAYLOAD: usize = 2048;

/// Reads AEAD records from a stream, tracking the rolling nonce for one
/// direction.
pub struct RecordReader<R> {
    inner: R,
    key: SealingKey,
    nonce: Nonce,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Build a reader from the peer's handshake nonce.
    pub fn new(inner: R, password: &[u8], handshake_nonce: [u8; NONCE_SIZE]) -> Self {
        let key = crypto::derive_key(password, &handshake_nonce);
        Self {
            inner,
            key: SealingKey::new(&key),
            nonce: Nonce::from_bytes(handshake_nonce),
        }
    }

    /// Read and open one record, advancing the nonce twice.
    ///
    /// Fails with a protocol error on authentication failure or an oversized
    /// length, and with an IO error on EOF mid-record.
    pub async fn read_record(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 2 + TAG_SIZE];
        self.inner.read_exact(&mut header).await?;
        let len_bytes = self.key.open(&self.nonce, &header)?;
        self.nonce.increment();

        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        if len > MAX_RECORD_PAYLOAD {
            return Err(Error::Protocol("record exceeds maximum payload"));
        }

        let mut body = vec![0u8; len + TAG_SIZE];
        self.inner.read_exact(&mut body).await?;
        let plaintext = self.key.open(&self.nonce, &body)?;
        self.nonce.increment();
        Ok(plaintext)
    }
}

/// Writes AEAD records to a stream, tracking the rolling nonce for one
/// direction.
pub struct RecordWriter<W> {
    inner: W,
    key: SealingKey,
    nonce: Nonce,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    /// Build a writer from a known handshake nonce. The caller is
    /// responsible for having sent the nonce to the peer.
    pub fn with_nonce(inner: W, password: &[u8], handshake_nonce: [u8; NONCE_SIZE]) -> Self {
        let key = crypto::derive_key(password, &handshake_nonce);
        Self {
            inner,
            key: SealingKey::new(&key),
            nonce: Nonce::from_bytes(handshake_nonce),
        }
    }

    /// Generate a fresh nonce, write its 12 bytes in the clear so the peer
    /// can derive the reverse key, and return the writer. The caller
    /// accounts for the [`NONCE_SIZE`] handshake bytes.
    pub async fn negotiate(mut inner: W, password: &[u8]) -> Result<Self> {
        let (key, nonce) = crypto::prepare_key(password);
        inner.write_all(nonce.as_bytes()).await?;
        Ok(Self { inner, key, nonce })
    }

    /// Seal and write one record, advancing the nonce twice.
    ///
    /// Returns the number of bytes put on the wire (length header, payload
    /// and both tags).
    pub async fn write_record(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.len() > MAX_RECORD_PAYLOAD {
            return Err(Error::Protocol("record exceeds maximum payload"));
        }

        let len_bytes = (payload.len() as u16).to_be_bytes();
        let header = self.key.seal(&self.nonce, &len_bytes)?;
        self.nonce.increment();
        let body = self.key.seal(&self.nonce, payload)?;
        self.nonce.increment();

        // One write per record so partial frames never interleave.
        let mut frame = Vec::with_capacity(header.len() + body.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&body);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(frame.len())
    }
}
