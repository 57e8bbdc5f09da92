//! NHRP cache seam
//!
//! The cache and its peers belong to the NHRP protocol layer. The route core
//! consults bindings during resolution and rebinds local entries when the
//! IPv6 primary address moves; [`NhrpCache`] is the whole contract.
//! [`BindingCache`] is the in-process table the daemon binary runs with.

use crate::types::{CacheEntry, CacheType, Holding, IfIndex};
use nhrp_types::IpAddress;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Cache operations the route core depends on
pub trait NhrpCache {
    /// Reference-counted peer handle
    type Peer: Clone;

    /// Looks up the current binding for `addr` on `ifindex`.
    fn get(&self, ifindex: IfIndex, addr: &IpAddress) -> Option<CacheEntry<Self::Peer>>;

    /// Rebinds the entry for `addr` on `ifindex`, creating it first when
    /// `create` is set. Returns false when no entry exists and none was created.
    fn update_binding(
        &mut self,
        ifindex: IfIndex,
        addr: &IpAddress,
        create: bool,
        cache_type: CacheType,
        holding: Holding,
        peer: Option<Self::Peer>,
    ) -> bool;
}

/// Remote node reachable over the NBMA network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbmaPeer {
    pub ifindex: IfIndex,
    pub nbma_address: IpAddress,
}

#[derive(Debug, Clone)]
struct Binding {
    cache_type: CacheType,
    holding: Holding,
    peer: Option<Rc<NbmaPeer>>,
}

/// HashMap-backed cache keyed by (interface, protocol address)
#[derive(Debug, Default)]
pub struct BindingCache {
    entries: HashMap<(IfIndex, IpAddress), Binding>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `addr` to a peer at `nbma_address`, returning the shared peer handle.
    pub fn insert_peer(
        &mut self,
        ifindex: IfIndex,
        addr: IpAddress,
        cache_type: CacheType,
        nbma_address: IpAddress,
    ) -> Rc<NbmaPeer> {
        let peer = Rc::new(NbmaPeer {
            ifindex,
            nbma_address,
        });
        self.entries.insert(
            (ifindex, addr),
            Binding {
                cache_type,
                holding: Holding::Indefinite,
                peer: Some(Rc::clone(&peer)),
            },
        );
        peer
    }

    /// Validity of the entry, if present.
    pub fn holding(&self, ifindex: IfIndex, addr: &IpAddress) -> Option<Holding> {
        self.entries.get(&(ifindex, *addr)).map(|b| b.holding)
    }

    pub fn remove(&mut self, ifindex: IfIndex, addr: &IpAddress) -> bool {
        self.entries.remove(&(ifindex, *addr)).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NhrpCache for BindingCache {
    type Peer = Rc<NbmaPeer>;

    fn get(&self, ifindex: IfIndex, addr: &IpAddress) -> Option<CacheEntry<Self::Peer>> {
        self.entries.get(&(ifindex, *addr)).map(|b| CacheEntry {
            cache_type: b.cache_type,
            peer: b.peer.clone(),
        })
    }

    fn update_binding(
        &mut self,
        ifindex: IfIndex,
        addr: &IpAddress,
        create: bool,
        cache_type: CacheType,
        holding: Holding,
        peer: Option<Self::Peer>,
    ) -> bool {
        let key = (ifindex, *addr);
        if !create && !self.entries.contains_key(&key) {
            return false;
        }

        debug!(ifindex, addr = %addr, cache_type = %cache_type, ?holding, "Cache rebind");

        let peer = match holding {
            Holding::Reset => None,
            Holding::Indefinite => peer,
        };
        self.entries.insert(
            key,
            Binding {
                cache_type,
                holding,
                peer,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_get_missing() {
        let cache = BindingCache::new();
        assert!(cache.get(1, &addr("10.0.0.1")).is_none());
    }

    #[test]
    fn test_update_without_create_requires_entry() {
        let mut cache = BindingCache::new();
        let a = addr("2001:db8::1");
        assert!(!cache.update_binding(1, &a, false, CacheType::Local, Holding::Reset, None));
        assert!(cache.is_empty());

        assert!(cache.update_binding(1, &a, true, CacheType::Local, Holding::Indefinite, None));
        assert_eq!(cache.get(1, &a).unwrap().cache_type, CacheType::Local);
        assert_eq!(cache.holding(1, &a), Some(Holding::Indefinite));
    }

    #[test]
    fn test_peer_handle_is_shared() {
        let mut cache = BindingCache::new();
        let a = addr("10.0.0.2");
        let peer = cache.insert_peer(4, a, CacheType::Dynamic, addr("192.0.2.2"));

        let entry = cache.get(4, &a).unwrap();
        let handle = entry.peer.unwrap();
        assert!(Rc::ptr_eq(&peer, &handle));
        assert_eq!(Rc::strong_count(&peer), 3);
    }

    #[test]
    fn test_reset_drops_peer() {
        let mut cache = BindingCache::new();
        let a = addr("10.0.0.2");
        let peer = cache.insert_peer(4, a, CacheType::Dynamic, addr("192.0.2.2"));

        assert!(cache.update_binding(4, &a, false, CacheType::Local, Holding::Reset, Some(peer)));
        let entry = cache.get(4, &a).unwrap();
        assert_eq!(entry.cache_type, CacheType::Local);
        assert!(entry.peer.is_none());
        assert!(cache.remove(4, &a));
    }
}
