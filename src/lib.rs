//! Encrypted TCP/UDP relay server
//!
//! The server terminates encrypted client connections, extracts a
//! destination address from the first record, dials the destination through
//! an injected dialer, and relays bytes in both directions while rotating
//! AEAD nonces. UDP datagrams are demultiplexed into per-flow exchanges with
//! source-port pinning so re-created flows keep a stable source address.
//!
//! Architecture:
//! - `crypto` / `framer` / `packet`: the wire protocol (key derivation,
//!   record framing for TCP, single-shot datagram sealing for UDP)
//! - `tcp` / `udp`: the relay loops
//! - `authman` / `dialer`: extension seams injected by the embedder
//! - `server`: lifecycle (construction, runner group, shutdown)

pub mod address;
pub mod authman;
pub mod config;
pub mod crypto;
pub mod dialer;
pub mod error;
pub mod framer;
pub mod logger;
pub mod packet;
pub mod server;
mod tcp;
mod udp;
mod utils;

pub use address::Address;
pub use authman::{Authman, Internet, Protocol};
pub use dialer::{Dialer, NetDialer};
pub use error::{Error, Result};
pub use server::Server;
