//! Local mirror of the system routing table
//!
//! One [`RouteTable`] per address family, keyed by network prefix. An entry
//! only lives while at least one of its fields is set: every update runs the
//! release check and drops entries that became empty.
//!
//! Lookups hand out copies of [`RouteInfo`], so a result stays valid for the
//! rest of a callback even if a later step removes the route.

use crate::error::{NhrpRouteError, Result};
use crate::types::IfIndex;
use ipnet::{Ipv4Net, Ipv6Net};
use nhrp_types::{AddressFamily, IpAddress, IpPrefix};
use prefix_trie::{Prefix, PrefixMap};
use std::fmt;
use tracing::trace;

/// Route metadata for one prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteInfo {
    /// Next hop learned from the RIB manager, `None` when unset
    pub via: Option<IpAddress>,
    /// Interface learned from the RIB manager
    pub ifindex: Option<IfIndex>,
    /// Set when the destination is an NHRP-mapped network; takes precedence
    /// over `via`/`ifindex` during resolution
    pub nhrp_ifindex: Option<IfIndex>,
}

impl RouteInfo {
    /// True when no field is set and the entry must be released.
    pub fn is_empty(&self) -> bool {
        self.via.is_none() && self.ifindex.is_none() && self.nhrp_ifindex.is_none()
    }
}

enum Rib {
    V4(PrefixMap<Ipv4Net, RouteInfo>),
    V6(PrefixMap<Ipv6Net, RouteInfo>),
}

/// Prefix table for a single address family
///
/// Entries are only written through [`RouteStore`], which releases them as
/// soon as they become empty.
pub struct RouteTable {
    rib: Rib,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("family", &self.family())
            .field("len", &self.len())
            .finish()
    }
}

fn v4_key(prefix: &IpPrefix) -> Option<Ipv4Net> {
    let addr = prefix.address().as_ipv4()?;
    Ipv4Net::new((*addr).into(), prefix.prefix_len())
        .ok()
        .map(|net| net.trunc())
}

fn v6_key(prefix: &IpPrefix) -> Option<Ipv6Net> {
    let addr = prefix.address().as_ipv6()?;
    Ipv6Net::new((*addr).into(), prefix.prefix_len())
        .ok()
        .map(|net| net.trunc())
}

fn from_v4(net: &Ipv4Net) -> Option<IpPrefix> {
    IpPrefix::new(net.network().into(), net.prefix_len()).ok()
}

fn from_v6(net: &Ipv6Net) -> Option<IpPrefix> {
    IpPrefix::new(net.network().into(), net.prefix_len()).ok()
}

/// Get-or-create (when `create`), apply `update`, release if left empty.
fn apply<P, F>(
    map: &mut PrefixMap<P, RouteInfo>,
    key: P,
    create: bool,
    update: F,
) -> Option<RouteInfo>
where
    P: Prefix + Copy + fmt::Display,
    F: FnOnce(&mut RouteInfo),
{
    if create && map.get(&key).is_none() {
        map.insert(key, RouteInfo::default());
    }
    let info = map.get_mut(&key)?;
    update(info);
    let result = *info;

    if result.is_empty() {
        trace!(prefix = %key, "Releasing empty route entry");
        map.remove(&key);
    }
    Some(result)
}

impl RouteTable {
    pub fn new(family: AddressFamily) -> Self {
        let rib = match family {
            AddressFamily::Ipv4 => Rib::V4(PrefixMap::new()),
            AddressFamily::Ipv6 => Rib::V6(PrefixMap::new()),
        };
        Self { rib }
    }

    pub fn family(&self) -> AddressFamily {
        match self.rib {
            Rib::V4(_) => AddressFamily::Ipv4,
            Rib::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Exact lookup; host bits of `prefix` are ignored.
    pub fn get(&self, prefix: &IpPrefix) -> Option<&RouteInfo> {
        match &self.rib {
            Rib::V4(map) => map.get(&v4_key(prefix)?),
            Rib::V6(map) => map.get(&v6_key(prefix)?),
        }
    }

    /// Most specific stored prefix containing `addr`.
    pub fn longest_match(&self, addr: &IpAddress) -> Option<(IpPrefix, &RouteInfo)> {
        let host = IpPrefix::host(*addr);
        match &self.rib {
            Rib::V4(map) => {
                let (net, info) = map.get_lpm(&v4_key(&host)?)?;
                Some((from_v4(net)?, info))
            }
            Rib::V6(map) => {
                let (net, info) = map.get_lpm(&v6_key(&host)?)?;
                Some((from_v6(net)?, info))
            }
        }
    }

    fn update<F>(&mut self, prefix: &IpPrefix, create: bool, update: F) -> Option<RouteInfo>
    where
        F: FnOnce(&mut RouteInfo),
    {
        match &mut self.rib {
            Rib::V4(map) => apply(map, v4_key(prefix)?, create, update),
            Rib::V6(map) => apply(map, v6_key(prefix)?, create, update),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (IpPrefix, &RouteInfo)> + '_> {
        match &self.rib {
            Rib::V4(map) => Box::new(map.iter().filter_map(|(n, i)| Some((from_v4(n)?, i)))),
            Rib::V6(map) => Box::new(map.iter().filter_map(|(n, i)| Some((from_v6(n)?, i)))),
        }
    }

    pub fn len(&self) -> usize {
        match &self.rib {
            Rib::V4(map) => map.len(),
            Rib::V6(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-family route tables
///
/// `RouteStore::default()` has no tables (before `init` / after `shutdown`);
/// every operation then reports [`NhrpRouteError::UnsupportedFamily`].
#[derive(Debug, Default)]
pub struct RouteStore {
    ipv4: Option<RouteTable>,
    ipv6: Option<RouteTable>,
}

impl RouteStore {
    /// Store with both family tables open.
    pub fn new() -> Self {
        let mut store = Self::default();
        store.open_tables();
        store
    }

    pub fn open_tables(&mut self) {
        self.ipv4
            .get_or_insert_with(|| RouteTable::new(AddressFamily::Ipv4));
        self.ipv6
            .get_or_insert_with(|| RouteTable::new(AddressFamily::Ipv6));
    }

    pub fn close_tables(&mut self) {
        self.ipv4 = None;
        self.ipv6 = None;
    }

    pub fn is_open(&self) -> bool {
        self.ipv4.is_some() && self.ipv6.is_some()
    }

    pub fn table(&self, family: AddressFamily) -> Result<&RouteTable> {
        match family {
            AddressFamily::Ipv4 => self.ipv4.as_ref(),
            AddressFamily::Ipv6 => self.ipv6.as_ref(),
        }
        .ok_or(NhrpRouteError::UnsupportedFamily(family))
    }

    fn table_mut(&mut self, family: AddressFamily) -> Result<&mut RouteTable> {
        match family {
            AddressFamily::Ipv4 => self.ipv4.as_mut(),
            AddressFamily::Ipv6 => self.ipv6.as_mut(),
        }
        .ok_or(NhrpRouteError::UnsupportedFamily(family))
    }

    /// Applies `update` to the entry for `prefix`, allocating it if missing.
    ///
    /// Returns the entry as left by `update`. An entry left empty is released
    /// before this returns, so it is never observable afterwards.
    pub fn get_or_create<F>(&mut self, prefix: &IpPrefix, update: F) -> Result<RouteInfo>
    where
        F: FnOnce(&mut RouteInfo),
    {
        self.table_mut(prefix.family())?
            .update(prefix, true, update)
            .ok_or(NhrpRouteError::UnsupportedFamily(prefix.family()))
    }

    pub fn lookup_exact(&self, prefix: &IpPrefix) -> Option<RouteInfo> {
        self.table(prefix.family()).ok()?.get(prefix).copied()
    }

    pub fn lookup_longest_match(&self, addr: &IpAddress) -> Option<(IpPrefix, RouteInfo)> {
        self.table(addr.family())
            .ok()?
            .longest_match(addr)
            .map(|(prefix, info)| (prefix, *info))
    }

    /// Records the RIB manager's view of `prefix`.
    ///
    /// With neither a next hop nor an interface this is a withdrawal: an
    /// existing entry is cleared, a missing one is not created.
    pub fn update_kernel_route(
        &mut self,
        prefix: &IpPrefix,
        via: Option<IpAddress>,
        ifindex: Option<IfIndex>,
    ) -> Result<()> {
        let create = via.is_some() || ifindex.is_some();
        self.table_mut(prefix.family())?
            .update(prefix, create, |info| {
                info.via = via;
                info.ifindex = ifindex;
            });
        Ok(())
    }

    /// Marks (or unmarks with `None`) `prefix` as an NHRP-mapped network.
    pub fn update_nhrp_mark(&mut self, prefix: &IpPrefix, ifindex: Option<IfIndex>) -> Result<()> {
        self.table_mut(prefix.family())?
            .update(prefix, ifindex.is_some(), |info| info.nhrp_ifindex = ifindex);
        Ok(())
    }

    /// Total entries across both families.
    pub fn len(&self) -> usize {
        AddressFamily::ALL
            .iter()
            .filter_map(|family| self.table(*family).ok())
            .map(RouteTable::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_unwritten_prefixes_are_absent() {
        let store = RouteStore::new();
        assert!(store.lookup_exact(&prefix("10.0.0.0/8")).is_none());
        assert!(store.lookup_longest_match(&addr("10.1.1.1")).is_none());
        assert!(store.lookup_longest_match(&addr("2001:db8::1")).is_none());
    }

    #[test]
    fn test_closed_store_is_unsupported() {
        let mut store = RouteStore::default();
        let err = store
            .get_or_create(&prefix("10.0.0.0/8"), |info| info.ifindex = Some(1))
            .unwrap_err();
        assert!(matches!(err, NhrpRouteError::UnsupportedFamily(AddressFamily::Ipv4)));
        assert!(store.lookup_longest_match(&addr("10.1.1.1")).is_none());
        assert!(store
            .update_kernel_route(&prefix("::/0"), Some(addr("fe80::1")), Some(2))
            .is_err());
    }

    #[test]
    fn test_longest_match_prefers_specific() {
        let mut store = RouteStore::new();
        store
            .update_kernel_route(&prefix("0.0.0.0/0"), Some(addr("192.0.2.1")), Some(1))
            .unwrap();
        store
            .update_kernel_route(&prefix("10.0.0.0/8"), Some(addr("192.0.2.2")), Some(1))
            .unwrap();
        store
            .update_kernel_route(&prefix("10.1.0.0/16"), None, Some(3))
            .unwrap();

        let (p, info) = store.lookup_longest_match(&addr("10.1.2.3")).unwrap();
        assert_eq!(p, prefix("10.1.0.0/16"));
        assert_eq!(info.ifindex, Some(3));

        let (p, _) = store.lookup_longest_match(&addr("10.2.0.1")).unwrap();
        assert_eq!(p, prefix("10.0.0.0/8"));

        let (p, _) = store.lookup_longest_match(&addr("172.16.0.1")).unwrap();
        assert_eq!(p, prefix("0.0.0.0/0"));
    }

    #[test]
    fn test_longest_match_ipv6_host_route() {
        let mut store = RouteStore::new();
        store
            .update_kernel_route(&prefix("2001:db8::/32"), Some(addr("fe80::1")), Some(2))
            .unwrap();
        store
            .update_kernel_route(&prefix("2001:db8::5/128"), None, Some(4))
            .unwrap();

        let (p, info) = store.lookup_longest_match(&addr("2001:db8::5")).unwrap();
        assert_eq!(p, prefix("2001:db8::5/128"));
        assert_eq!(info.ifindex, Some(4));

        let (p, _) = store.lookup_longest_match(&addr("2001:db8::6")).unwrap();
        assert_eq!(p, prefix("2001:db8::/32"));
    }

    #[test]
    fn test_get_or_create_never_leaves_empty_entry() {
        let mut store = RouteStore::new();
        let p = prefix("10.0.0.0/8");

        let info = store.get_or_create(&p, |_| {}).unwrap();
        assert!(info.is_empty());
        assert!(store.lookup_exact(&p).is_none());
        assert!(store.lookup_longest_match(&addr("10.0.0.1")).is_none());
        assert!(store.is_empty());

        let info = store.get_or_create(&p, |info| info.nhrp_ifindex = Some(3)).unwrap();
        assert_eq!(info.nhrp_ifindex, Some(3));
        assert_eq!(store.lookup_exact(&p), Some(info));

        store.get_or_create(&p, |info| info.nhrp_ifindex = None).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_iter_yields_network_prefixes() {
        let mut store = RouteStore::new();
        store
            .update_kernel_route(&prefix("10.1.2.3/16"), None, Some(3))
            .unwrap();
        store.update_nhrp_mark(&prefix("192.0.2.0/24"), Some(5)).unwrap();

        let table = store.table(AddressFamily::Ipv4).unwrap();
        let mut prefixes: Vec<String> = table.iter().map(|(p, _)| p.to_string()).collect();
        prefixes.sort();
        assert_eq!(prefixes, vec!["10.1.0.0/16", "192.0.2.0/24"]);
    }

    #[test]
    fn test_keys_are_normalized() {
        let mut store = RouteStore::new();
        store.update_kernel_route(&prefix("10.1.2.3/16"), None, Some(3)).unwrap();
        assert!(store.lookup_exact(&prefix("10.1.0.0/16")).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_withdraw_of_missing_route_creates_nothing() {
        let mut store = RouteStore::new();
        store.update_kernel_route(&prefix("10.0.0.0/8"), None, None).unwrap();
        store.update_nhrp_mark(&prefix("10.0.0.0/8"), None).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_full_cleanup() {
        let mut store = RouteStore::new();
        let p = prefix("10.0.0.0/8");
        store.update_kernel_route(&p, Some(addr("192.0.2.1")), Some(1)).unwrap();
        store.update_nhrp_mark(&p, Some(7)).unwrap();

        store.update_kernel_route(&p, None, None).unwrap();
        assert_eq!(
            store.lookup_exact(&p),
            Some(RouteInfo {
                via: None,
                ifindex: None,
                nhrp_ifindex: Some(7),
            })
        );

        store.update_nhrp_mark(&p, None).unwrap();
        assert!(store.lookup_exact(&p).is_none());
        assert!(store.lookup_longest_match(&addr("10.0.0.1")).is_none());
    }

    #[test]
    fn test_nhrp_mark_survives_kernel_withdraw() {
        let mut store = RouteStore::new();
        let p = prefix("2001:db8:100::/48");
        store.update_nhrp_mark(&p, Some(4)).unwrap();
        store.update_kernel_route(&p, None, None).unwrap();
        assert_eq!(store.lookup_exact(&p).unwrap().nhrp_ifindex, Some(4));
    }

    #[test]
    fn test_families_are_separate() {
        let mut store = RouteStore::new();
        store
            .update_kernel_route(&prefix("::/0"), Some(addr("fe80::1")), Some(2))
            .unwrap();
        assert!(store.lookup_longest_match(&addr("10.0.0.1")).is_none());
        assert_eq!(store.table(AddressFamily::Ipv6).unwrap().len(), 1);
        assert!(store.table(AddressFamily::Ipv4).unwrap().is_empty());
    }

    #[test]
    fn test_close_tables() {
        let mut store = RouteStore::new();
        store.update_kernel_route(&prefix("10.0.0.0/8"), None, Some(1)).unwrap();
        store.close_tables();
        assert!(!store.is_open());
        assert!(store.lookup_exact(&prefix("10.0.0.0/8")).is_none());
    }
}
