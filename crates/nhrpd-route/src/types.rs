//! Core types shared by the route store, the resolver and the RIB sync service

use nhrp_types::{IpAddress, IpPrefix};
use std::fmt;

/// Kernel interface index
pub type IfIndex = u32;

/// Interface index zebra uses for "no interface"
pub const IFINDEX_INTERNAL: IfIndex = 0;

/// NHRP cache binding type, weakest first.
///
/// Ordering matters: resolution accepts a binding as a live next hop only
/// when it is `Dynamic` or stronger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheType {
    Invalid,
    Incomplete,
    Negative,
    Cached,
    Static,
    Nhs,
    Dynamic,
    Local,
}

impl CacheType {
    /// Whether routes announced for this binding are regular, redistributable routes
    pub fn is_redistributable(&self) -> bool {
        matches!(self, CacheType::Dynamic | CacheType::Nhs | CacheType::Static)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheType::Invalid => "invalid",
            CacheType::Incomplete => "incomplete",
            CacheType::Negative => "negative",
            CacheType::Cached => "cached",
            CacheType::Static => "static",
            CacheType::Nhs => "nhs",
            CacheType::Dynamic => "dynamic",
            CacheType::Local => "local",
        };
        f.write_str(name)
    }
}

/// Validity requested when rebinding a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holding {
    /// Drop any pending expiry and peer; the entry keeps only its new type
    Reset,
    /// Valid until explicitly rebound
    Indefinite,
}

/// Snapshot of one NHRP cache entry as seen by the route core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<P> {
    pub cache_type: CacheType,
    /// Peer handle; cloning it takes a reference
    pub peer: Option<P>,
}

/// Add or withdraw a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    Add,
    Delete,
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteAction::Add => f.write_str("add"),
            RouteAction::Delete => f.write_str("del"),
        }
    }
}

/// How an address is reachable from this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteType<P> {
    /// The address is one of ours on an NHRP interface
    Local,
    /// No usable route
    Blackhole,
    /// The path leaves the originating NBMA network
    OffNbma,
    /// Reachable through a live NHRP peer
    NbmaNexthop(P),
}

impl<P> RouteType<P> {
    pub fn is_blackhole(&self) -> bool {
        matches!(self, RouteType::Blackhole)
    }

    pub fn peer(&self) -> Option<&P> {
        match self {
            RouteType::NbmaNexthop(peer) => Some(peer),
            _ => None,
        }
    }
}

/// Result of resolving an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<P> {
    pub route_type: RouteType<P>,
    /// Prefix of the first route matched; indirect hops never replace it
    pub prefix: Option<IpPrefix>,
}

impl<P> Resolution<P> {
    pub(crate) fn new(route_type: RouteType<P>, prefix: Option<IpPrefix>) -> Self {
        Self { route_type, prefix }
    }
}

/// One non-recursive lookup step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    /// Matched prefix
    pub prefix: IpPrefix,
    /// Gateway, `None` when on-link or delegated to an NHRP interface
    pub via: Option<IpAddress>,
    pub ifindex: Option<IfIndex>,
}

/// Events delivered to interface listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    NbmaAddressChanged,
}
