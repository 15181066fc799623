use std::io;
use thiserror::Error;

/// Unified error type for the relay server.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (dial, resolve, deadline)
    #[error("Network error: {0}")]
    Network(String),

    /// Wire protocol violation: failed record authentication, short or
    /// oversized record, unknown address type
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Outbound UDP dial lost a source-port reuse race; dropped silently.
    #[error("local address already in use")]
    AddrInUse,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that are swallowed without logging above debug level.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::AddrInUse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "socket gone");
        let err: Error = io_err.into();
        let display = format!("{}", err);
        assert!(display.contains("IO error"));
        assert!(display.contains("socket gone"));
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("malformed listen address".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("malformed listen address"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = Error::Protocol("record authentication failed");
        let display = format!("{}", err);
        assert!(display.contains("Protocol error"));
        assert!(display.contains("record authentication failed"));
    }

    #[test]
    fn test_auth_error_display() {
        let err = Error::Auth("token rejected".to_string());
        assert!(format!("{}", err).contains("Authentication error"));
    }

    #[test]
    fn test_addr_in_use_is_transient() {
        assert!(Error::AddrInUse.is_transient());
        assert!(!Error::Auth("no".to_string()).is_transient());
        assert!(!Error::Protocol("short record").is_transient());
    }

    #[test]
    fn test_result_type_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
