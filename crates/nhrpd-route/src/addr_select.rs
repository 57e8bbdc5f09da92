//! IPv6 primary NBMA address selection
//!
//! When an IPv6 route arrives that tells us where the default gateway is,
//! the interface's first global address covering that gateway becomes the
//! node's NBMA identity on the interface. The cache's local binding follows
//! the choice: the old address is demoted, the new one promoted.
//!
//! Every step can bail out; bailing out is the common case and is silent.

use crate::cache::NhrpCache;
use crate::interface::{Interface, InterfaceNotifier, InterfaceRegistry};
use crate::route_store::RouteStore;
use crate::types::{CacheType, Holding, IfIndex, InterfaceEvent};
use nhrp_types::{AddressFamily, IpAddress, IpPrefix};
use tracing::{debug, info, trace};

/// Host prefix of the default gateway implied by a route add, if any.
///
/// A default route names the gateway directly. An on-link route (`::` via)
/// on the interface that already carries the default route refers back to
/// that route's gateway.
fn gateway_candidate(
    store: &RouteStore,
    prefix: &IpPrefix,
    via: &IpAddress,
    ifindex: IfIndex,
) -> Option<IpPrefix> {
    if prefix.is_default() {
        return Some(IpPrefix::host(*via));
    }
    if !via.is_unspecified() {
        return None;
    }

    let default = store.lookup_exact(&IpPrefix::default_route(AddressFamily::Ipv6))?;
    if default.ifindex != Some(ifindex) {
        return None;
    }
    default
        .via
        .filter(|gw| !gw.is_unspecified())
        .map(IpPrefix::host)
}

/// First global IPv6 address of `iface` whose prefix covers `gateway`.
fn scan_addresses(iface: &Interface, gateway: &IpPrefix) -> Option<IpAddress> {
    iface
        .connected
        .iter()
        .filter(|p| p.family() == AddressFamily::Ipv6 && !p.address().is_link_local())
        .find(|p| p.contains(gateway))
        .map(|p| *p.address())
}

/// Runs the selection for an IPv6 route add on `ifindex`.
///
/// Returns the newly selected address when the interface's primary address
/// changed, `None` on every no-op path.
pub fn select_primary_address<C: NhrpCache>(
    store: &RouteStore,
    interfaces: &mut dyn InterfaceRegistry,
    cache: &mut C,
    notifier: &mut dyn InterfaceNotifier,
    prefix: &IpPrefix,
    via: &IpAddress,
    ifindex: IfIndex,
) -> Option<IpAddress> {
    if prefix.family() != AddressFamily::Ipv6 {
        return None;
    }

    let Some(gateway) = gateway_candidate(store, prefix, via, ifindex) else {
        trace!(prefix = %prefix, via = %via, "Not a default gateway update");
        return None;
    };

    let iface = interfaces.by_index_mut(ifindex)?;
    let Some(selected) = scan_addresses(iface, &gateway) else {
        debug!(
            ifname = %iface.name,
            gateway = %gateway,
            "No global address covers the default gateway"
        );
        return None;
    };

    let afi = iface.afi_mut(AddressFamily::Ipv6);
    if afi.nbma_address == Some(selected) {
        return None;
    }

    if let Some(old) = afi.nbma_address {
        cache.update_binding(ifindex, &old, false, CacheType::Local, Holding::Reset, None);
    }
    afi.nbma_address = Some(selected);
    if afi.configured {
        cache.update_binding(
            ifindex,
            &selected,
            true,
            CacheType::Local,
            Holding::Indefinite,
            None,
        );
    }

    info!(
        ifname = %iface.name,
        address = %selected,
        gateway = %gateway,
        "IPv6 primary address selected"
    );
    notifier.notify(ifindex, InterfaceEvent::NbmaAddressChanged);
    Some(selected)
}
