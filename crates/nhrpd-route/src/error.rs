//! Error types for the NHRP route core

use nhrp_types::AddressFamily;
use thiserror::Error;

/// Errors that can occur in the route core
///
/// None of these are fatal to the daemon: a missing table reads as "no route",
/// a malformed zebra message is dropped, and a down session skips announces.
#[derive(Debug, Error)]
pub enum NhrpRouteError {
    /// No route table exists for the family (core not initialized or torn down)
    #[error("Unsupported address family: {0}")]
    UnsupportedFamily(AddressFamily),

    /// Malformed message from the RIB manager
    #[error("Decode error: {0}")]
    Decode(String),

    /// RIB session is not connected
    #[error("RIB session disconnected")]
    Disconnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NhrpRouteError {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        NhrpRouteError::Decode(msg.into())
    }
}

/// Result type alias for route core operations
pub type Result<T> = std::result::Result<T, NhrpRouteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NhrpRouteError::UnsupportedFamily(AddressFamily::Ipv6);
        assert_eq!(err.to_string(), "Unsupported address family: ipv6");

        let err = NhrpRouteError::decode("truncated nexthop");
        assert_eq!(err.to_string(), "Decode error: truncated nexthop");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: NhrpRouteError = io.into();
        assert!(matches!(err, NhrpRouteError::Io(_)));
    }
}
