//! Common network types for the NHRP daemon.
//!
//! This crate provides type-safe representations of the network primitives
//! shared between the route core and the rest of nhrpd:
//!
//! - [`IpAddress`]: IPv4 and IPv6 addresses
//! - [`IpPrefix`]: IP network prefixes (CIDR notation) with containment tests
//! - [`AddressFamily`]: the two families the daemon keeps tables for

mod ip;

pub use ip::{AF_INET, AF_INET6, AddressFamily, IpAddress, IpPrefix, Ipv4Address, Ipv6Address};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
