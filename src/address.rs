use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::lookup_host;

use crate::error::{Error, Result};

const DNS_RESOLVE_TIMEOUT_SECS: u64 = 10;

/// Address type constants (SOCKS5 address encoding)
pub const ATYP_IPV4: u8 = 1;
pub const ATYP_DOMAIN: u8 = 3;
pub const ATYP_IPV6: u8 = 4;

/// Destination address triple carried by the wire protocol.
///
/// Encoding:
/// - IPv4: 1 byte type (0x01) + 4 bytes IP + 2 bytes port
/// - Domain: 1 byte type (0x03) + 1 byte length + domain + 2 bytes port
/// - IPv6: 1 byte type (0x04) + 16 bytes IP + 2 bytes port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    IPv4([u8; 4], u16),
    IPv6([u8; 16], u16),
    Domain(String, u16),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::IPv4(ip, port) => write!(f, "{}:{}", Ipv4Addr::from(*ip), port),
            Address::IPv6(ip, port) => write!(f, "[{}]:{}", Ipv6Addr::from(*ip), port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::IPv4(v4.ip().octets(), v4.port()),
            SocketAddr::V6(v6) => Address::IPv6(v6.ip().octets(), v6.port()),
        }
    }
}

impl Address {
    /// Decode an address triple from the front of `buf`.
    ///
    /// Returns the address and the number of bytes consumed. The records and
    /// datagrams this is parsed out of arrive complete, so a truncated
    /// triple is a protocol violation rather than a retry signal.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.is_empty() {
            return Err(Error::Protocol("empty address"));
        }

        let atyp = buf[0];
        match atyp {
            ATYP_IPV4 => {
                // 1 (type) + 4 (ip) + 2 (port) = 7 bytes
                if buf.len() < 7 {
                    return Err(Error::Protocol("short IPv4 address"));
                }
                let mut ip = [0u8; 4];
                ip.copy_from_slice(&buf[1..5]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok((Address::IPv4(ip, port), 7))
            }
            ATYP_IPV6 => {
                // 1 (type) + 16 (ip) + 2 (port) = 19 bytes
                if buf.len() < 19 {
                    return Err(Error::Protocol("short IPv6 address"));
                }
                let mut ip = [0u8; 16];
                ip.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                Ok((Address::IPv6(ip, port), 19))
            }
            ATYP_DOMAIN => {
                // 1 (type) + 1 (len) + len (domain) + 2 (port)
                if buf.len() < 2 {
                    return Err(Error::Protocol("short domain address"));
                }
                let domain_len = buf[1] as usize;
                let total_len = 1 + 1 + domain_len + 2;
                if buf.len() < total_len {
                    return Err(Error::Protocol("short domain address"));
                }
                let domain = match std::str::from_utf8(&buf[2..2 + domain_len]) {
                    Ok(s) => s.to_string(),
                    Err(_) => return Err(Error::Protocol("invalid domain encoding")),
                };
                let port = u16::from_be_bytes([buf[2 + domain_len], buf[3 + domain_len]]);
                Ok((Address::Domain(domain, port), total_len))
            }
            _ => Err(Error::Protocol("unknown address type")),
        }
    }

    /// Encode the address triple onto `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Address::IPv4(ip, port) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::Domain(domain, port) => {
                buf.push(ATYP_DOMAIN);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::IPv6(ip, port) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_size(&self) -> usize {
        match self {
            Address::IPv4(_, _) => 1 + 4 + 2,
            Address::Domain(domain, _) => 1 + 1 + domain.len() + 2,
            Address::IPv6(_, _) => 1 + 16 + 2,
        }
    }

    /// The address type byte this triple encodes with.
    pub fn atyp(&self) -> u8 {
        match self {
            Address::IPv4(_, _) => ATYP_IPV4,
            Address::Domain(_, _) => ATYP_DOMAIN,
            Address::IPv6(_, _) => ATYP_IPV6,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::IPv4(_, port) | Address::IPv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    /// Resolve to a socket address, with a bounded DNS lookup for domains.
    pub async fn to_socket_addr(&self) -> Result<SocketAddr> {
        match self {
            Address::IPv4(ip, port) => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*ip)), *port)),
            Address::IPv6(ip, port) => Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*ip)), *port)),
            Address::Domain(domain, port) => {
                let addrs = tokio::time::timeout(
                    tokio::time::Duration::from_secs(DNS_RESOLVE_TIMEOUT_SECS),
                    lookup_host((domain.as_str(), *port)),
                )
                .await
                .map_err(|_| Error::Network(format!("DNS resolution timeout for {}", domain)))??;
                addrs
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Network(format!("failed to resolve {}", domain)))
            }
        }
    }
}
