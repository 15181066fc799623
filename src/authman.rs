//! Authentication and accounting plugin interface.
//!
//! The relay calls [`Authman::verify_token`] exactly once per TCP connection
//! (or once per newly created UDP exchange) and, on success, reports every
//! outbound write through the returned [`Internet`] handle until the
//! connection or exchange ends, at which point the handle is closed exactly
//! once. The relay treats the handle as opaque.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

/// Transport the token was presented over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection accounting session returned by a successful verification.
pub trait Internet: Send + Sync {
    /// Report bytes written on the TCP path.
    fn tcp_egress(&self, bytes: usize) -> Result<()>;
    /// Report bytes written on the UDP path.
    fn udp_egress(&self, bytes: usize) -> Result<()>;
    /// End the session. Called exactly once.
    fn close(&self);
}

/// Token verification plugin injected by the embedder.
#[async_trait]
pub trait Authman: Send + Sync {
    /// Authorize a token for the given protocol and destination.
    ///
    /// `payload` carries the user-data prefix of the first UDP datagram, and
    /// is absent on the TCP path. Rejection closes the connection silently.
    async fn verify_token(
        &self,
        token: &[u8],
        protocol: Protocol,
        atyp: u8,
        address: &str,
        payload: Option<&[u8]>,
    ) -> Result<Arc<dyn Internet>>;
}
