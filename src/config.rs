//! CLI and environment configuration for the server binary.

use clap::Parser;
use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::logger::LogLevel;

/// Parse a duration like "60s", "2m", "1h" or plain seconds; "0" disables.
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Command line arguments.
///
/// Every flag has a `CLOAK_`-prefixed environment fallback.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Encrypted TCP/UDP relay server")]
pub struct CliArgs {
    /// Address to listen on for both TCP and UDP (host:port)
    #[arg(long, short = 'l', env = "CLOAK_LISTEN", default_value = "0.0.0.0:9999")]
    pub listen: String,

    /// Shared password
    #[arg(long, short = 'p', env = "CLOAK_PASSWORD")]
    pub password: String,

    /// TCP idle deadline (e.g. "60s", "2m"); 0 disables
    #[arg(long, env = "CLOAK_TCP_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    pub tcp_timeout: Duration,

    /// UDP flow idle deadline (e.g. "60s", "2m"); 0 disables
    #[arg(long, env = "CLOAK_UDP_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    pub udp_timeout: Duration,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "CLOAK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl CliArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the arguments before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.password.is_empty() {
            return Err(Error::Config("password must not be empty".to_string()));
        }
        self.listen
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("malformed listen address {}: {}", self.listen, e)))?
            .next()
            .ok_or_else(|| {
                Error::Config(format!("listen address {} resolves to nothing", self.listen))
            })?;
        if LogLevel::from_str(&self.log_level).is_none() {
            return Err(Error::Config(format!("unknown log level {}", self.log_level)));
        }
        Ok(())
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_str(&self.log_level).unwrap_or_default()
    }
}
