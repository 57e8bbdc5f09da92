//! Bounded recursive route resolution
//!
//! Walks indirect routes in the [`RouteStore`] until it reaches an on-link
//! hop, then asks the NHRP cache who answers on that interface. The walk never
//! mutates the store; the only cache interaction is reading bindings and
//! cloning peer handles.

use crate::cache::NhrpCache;
use crate::interface::InterfaceRegistry;
use crate::route_store::RouteStore;
use crate::types::{CacheType, IfIndex, NextHop, Resolution, RouteType};
use nhrp_types::IpAddress;
use tracing::debug;

/// Route lookups allowed per resolution; a chain needing more is unresolved
pub const MAX_HOPS: usize = 4;

/// Single longest-prefix-match step, no recursion and no cache access.
///
/// An NHRP-marked route delegates to its NHRP interface and drops the gateway.
pub fn resolve_nexthop(store: &RouteStore, addr: &IpAddress) -> Option<NextHop> {
    let Some((prefix, info)) = store.lookup_longest_match(addr) else {
        debug!(addr = %addr, "Route lookup: no route");
        return None;
    };

    let hop = match info.nhrp_ifindex {
        Some(nhrp_ifindex) => {
            debug!(
                addr = %addr,
                prefix = %prefix,
                ifindex = nhrp_ifindex,
                "Route lookup: NHRP interface"
            );
            NextHop {
                prefix,
                via: None,
                ifindex: Some(nhrp_ifindex),
            }
        }
        None => {
            debug!(
                addr = %addr,
                prefix = %prefix,
                via = ?info.via,
                ifindex = ?info.ifindex,
                "Route lookup: kernel route"
            );
            NextHop {
                prefix,
                via: info.via,
                ifindex: info.ifindex,
            }
        }
    };
    Some(hop)
}

/// On-link gateway, or a host route pointing at itself.
fn is_terminal(via: &IpAddress, addr: &IpAddress) -> bool {
    via.is_unspecified() || via == addr
}

/// Classifies how `addr` is reached, optionally on behalf of `in_iface`.
///
/// The returned prefix is the first route matched; hops reached through
/// indirection never replace it. `Local` answers carry no prefix.
pub fn resolve<C: NhrpCache>(
    store: &RouteStore,
    interfaces: &dyn InterfaceRegistry,
    cache: &C,
    in_iface: Option<IfIndex>,
    addr: &IpAddress,
) -> Resolution<C::Peer> {
    let family = addr.family();

    if let Some(ifindex) = in_iface {
        if let Some(entry) = cache.get(ifindex, addr) {
            if entry.cache_type == CacheType::Local {
                debug!(addr = %addr, ifindex, "Resolve: local address");
                return Resolution::new(RouteType::Local, None);
            }
        }
    }

    let network_id = in_iface
        .and_then(|ifindex| interfaces.by_index(ifindex))
        .map_or(0, |iface| iface.network_id(family));

    let mut lookup = *addr;
    let mut first_prefix = None;
    let mut out_iface = None;
    let mut terminated = false;

    for hop in 0..MAX_HOPS {
        let Some(next) = resolve_nexthop(store, &lookup) else {
            return Resolution::new(RouteType::Blackhole, first_prefix);
        };
        first_prefix.get_or_insert(next.prefix);

        out_iface = next
            .ifindex
            .and_then(|ifindex| interfaces.by_index(ifindex));
        if let Some(iface) = out_iface {
            if network_id != 0 && iface.network_id(family) != network_id {
                debug!(
                    addr = %addr,
                    hop,
                    ifindex = iface.ifindex,
                    network_id,
                    "Resolve: path leaves the NBMA network"
                );
                return Resolution::new(RouteType::OffNbma, first_prefix);
            }
        }

        match next.via {
            Some(via) if !is_terminal(&via, &lookup) => lookup = via,
            _ => {
                terminated = true;
                break;
            }
        }
    }

    if !terminated {
        debug!(addr = %addr, max_hops = MAX_HOPS, "Resolve: hop limit exceeded");
        return Resolution::new(RouteType::Blackhole, first_prefix);
    }

    if let Some(iface) = out_iface {
        if let Some(entry) = cache.get(iface.ifindex, &lookup) {
            if entry.cache_type == CacheType::Local {
                return Resolution::new(RouteType::Local, None);
            }
            if entry.cache_type >= CacheType::Dynamic {
                if let Some(peer) = entry.peer {
                    debug!(
                        addr = %addr,
                        nexthop = %lookup,
                        ifindex = iface.ifindex,
                        "Resolve: NBMA peer"
                    );
                    return Resolution::new(RouteType::NbmaNexthop(peer), first_prefix);
                }
            }
        }
    }

    Resolution::new(RouteType::Blackhole, first_prefix)
}
