//! Synchronization with the RIB manager (zebra)
//!
//! Outbound, NHRP cache entries become ZAPI route add/delete messages.
//! Inbound, redistributed routes are mirrored into the [`RouteStore`], the
//! shortcut layer is told about the prefix, and IPv6 adds feed the primary
//! address selection.
//!
//! The session itself only owns the sending half of the transport. The
//! daemon loop attaches a channel per connection and drains it to the socket.

use crate::addr_select::select_primary_address;
use crate::cache::NhrpCache;
use crate::error::{NhrpRouteError, Result};
use crate::interface::{InterfaceNotifier, InterfaceRegistry};
use crate::route_store::RouteStore;
use crate::types::{CacheType, IfIndex, RouteAction, IFINDEX_INTERNAL};
use crate::zapi::{
    route_flag, route_type, BlackholeType, Command, NexthopGate, ZapiFrame, ZapiNexthop,
    ZapiRoute, VRF_DEFAULT,
};
use nhrp_types::{AddressFamily, IpAddress, IpPrefix};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

/// Receives prefix change notifications for NHRP shortcut handling
pub trait ShortcutNotifier {
    fn prefix_changed(&mut self, prefix: &IpPrefix, deleted: bool);
}

impl<F> ShortcutNotifier for F
where
    F: FnMut(&IpPrefix, bool),
{
    fn prefix_changed(&mut self, prefix: &IpPrefix, deleted: bool) {
        self(prefix, deleted)
    }
}

/// External components touched while handling an inbound route
pub struct Collaborators<'a, C: NhrpCache> {
    pub interfaces: &'a mut dyn InterfaceRegistry,
    pub cache: &'a mut C,
    pub shortcuts: &'a mut dyn ShortcutNotifier,
    pub notifier: &'a mut dyn InterfaceNotifier,
}

/// Connection state towards the RIB manager
#[derive(Debug, Default)]
pub struct RibSession {
    tx: Option<UnboundedSender<ZapiFrame>>,
    instance: u16,
}

impl RibSession {
    pub fn new(instance: u16) -> Self {
        Self { tx: None, instance }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Binds a fresh connection and queues the session bootstrap on it:
    /// hello, interface and router-id registration, then redistribution of
    /// all route types for both families.
    pub fn attach(&mut self, tx: UnboundedSender<ZapiFrame>) -> Result<()> {
        self.tx = Some(tx);
        self.send(ZapiFrame::hello(route_type::NHRP, self.instance))?;
        self.send(ZapiFrame::interface_add())?;
        for family in AddressFamily::ALL {
            self.send(ZapiFrame::router_id_add(family))?;
        }
        for family in AddressFamily::ALL {
            self.send(ZapiFrame::redistribute_add(family, route_type::ALL, 0))?;
        }
        info!(instance = self.instance, "RIB session attached");
        Ok(())
    }

    pub fn detach(&mut self) {
        if self.tx.take().is_some() {
            info!("RIB session detached");
        }
    }

    /// Queues one frame; fails with `Disconnected` when no transport is bound.
    pub fn send(&self, frame: ZapiFrame) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(NhrpRouteError::Disconnected)?;
        tx.send(frame).map_err(|_| NhrpRouteError::Disconnected)
    }

    /// Publishes an NHRP-derived route. Silently skipped while disconnected.
    #[instrument(skip_all, fields(action = %action, prefix = %prefix))]
    pub fn announce(
        &self,
        action: RouteAction,
        cache_type: CacheType,
        prefix: &IpPrefix,
        ifindex: Option<IfIndex>,
        nexthop: Option<&IpAddress>,
        mtu: u32,
    ) {
        if !self.is_connected() {
            return;
        }

        let route = build_route(cache_type, prefix, ifindex, nexthop, mtu, self.instance);
        let command = match action {
            RouteAction::Add => Command::RouteAdd,
            RouteAction::Delete => Command::RouteDelete,
        };
        debug!(
            cache_type = %cache_type,
            nexthops = ?route.nexthops,
            mtu,
            "Zebra send"
        );

        if let Err(e) = self.send(ZapiFrame::route(command, VRF_DEFAULT, &route)) {
            warn!(error = %e, "Failed to queue route update");
        }
    }
}

/// Builds the ZAPI route describing an NHRP cache entry.
pub fn build_route(
    cache_type: CacheType,
    prefix: &IpPrefix,
    ifindex: Option<IfIndex>,
    nexthop: Option<&IpAddress>,
    mtu: u32,
    instance: u16,
) -> ZapiRoute {
    let mut route = ZapiRoute::new(route_type::NHRP, prefix.network());
    route.instance = instance;
    route.flags = route_flag::ALLOW_RECURSION;
    if mtu != 0 {
        route.mtu = Some(mtu);
    }

    if cache_type == CacheType::Negative {
        route
            .nexthops
            .push(ZapiNexthop::new(NexthopGate::Blackhole(BlackholeType::Reject)));
        return route;
    }
    if !cache_type.is_redistributable() {
        route.flags |= route_flag::FIB_OVERRIDE;
    }

    // a host route through its own address is on-link
    let nexthop = nexthop
        .filter(|nh| nh.family() == prefix.family())
        .filter(|nh| !(prefix.is_host_route() && *nh == prefix.address()))
        .copied();

    let gate = match (nexthop, ifindex) {
        (Some(addr), Some(ifindex)) => Some(NexthopGate::AddressIfindex(addr, ifindex)),
        (Some(addr), None) => Some(NexthopGate::Address(addr)),
        (None, Some(ifindex)) => Some(NexthopGate::Ifindex(ifindex)),
        (None, None) => None,
    };
    route.nexthops.extend(gate.map(ZapiNexthop::new));
    route
}

/// Why an inbound route was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    SourceDestination,
    OwnRoute,
    PolicyRoute,
}

fn ignore_reason(route: &ZapiRoute) -> Option<IgnoreReason> {
    if route.is_srcdest() {
        Some(IgnoreReason::SourceDestination)
    } else if route.route_type == route_type::NHRP {
        Some(IgnoreReason::OwnRoute)
    } else if route.route_type == route_type::PBR {
        // PBR routes would redirect the NBMA address choice
        Some(IgnoreReason::PolicyRoute)
    } else {
        None
    }
}

/// Applies a redistributed route add/delete to the mirror.
///
/// Malformed bodies are returned as `Decode` errors with nothing changed.
#[instrument(skip_all, fields(command = ?frame.command()))]
pub fn handle_redistributed_route<C: NhrpCache>(
    store: &mut RouteStore,
    collab: &mut Collaborators<'_, C>,
    frame: &ZapiFrame,
) -> Result<()> {
    let added = match frame.command() {
        Command::RedistributeRouteAdd => true,
        Command::RedistributeRouteDel => false,
        other => {
            return Err(NhrpRouteError::decode(format!(
                "not a redistributed route: {other:?}"
            )))
        }
    };
    let route = frame.decode_route()?;

    if let Some(reason) = ignore_reason(&route) {
        debug!(
            prefix = %route.prefix,
            route_type = route.route_type,
            ?reason,
            "Ignoring redistributed route"
        );
        return Ok(());
    }

    let prefix = route.prefix;
    let (via, ifindex) = match route.nexthops.first() {
        Some(nh) => {
            let via = nh
                .gate
                .address()
                .unwrap_or_else(|| IpAddress::unspecified(prefix.family()));
            let ifindex = nh
                .gate
                .ifindex()
                .filter(|&i| i != IFINDEX_INTERNAL)
                .filter(|&i| collab.interfaces.by_index(i).is_some());
            (Some(via), ifindex)
        }
        None => (None, None),
    };

    debug!(
        action = if added { "add" } else { "del" },
        prefix = %prefix,
        via = ?via,
        ifindex = ?ifindex,
        "Redistributed route"
    );

    if added {
        store.update_kernel_route(&prefix, via, ifindex)?;
    } else {
        store.update_kernel_route(&prefix, None, None)?;
    }
    collab.shortcuts.prefix_changed(&prefix, !added);

    if let (true, AddressFamily::Ipv6, Some(via), Some(ifindex)) =
        (added, prefix.family(), via, ifindex)
    {
        select_primary_address(
            store,
            collab.interfaces,
            collab.cache,
            collab.notifier,
            &prefix,
            &via,
            ifindex,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BindingCache;
    use crate::interface::{Interface, InterfaceTable};
    use crate::types::InterfaceEvent;
    use crate::zapi::{message, nexthop_type};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    const BOOTSTRAP: [Command; 6] = [
        Command::Hello,
        Command::InterfaceAdd,
        Command::RouterIdAdd,
        Command::RouterIdAdd,
        Command::RedistributeAdd,
        Command::RedistributeAdd,
    ];

    fn attached() -> (RibSession, UnboundedReceiver<ZapiFrame>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RibSession::new(0);
        session.attach(tx).unwrap();
        // drain bootstrap
        for _ in 0..BOOTSTRAP.len() {
            rx.try_recv().unwrap();
        }
        (session, rx)
    }

    #[test]
    fn test_bootstrap_on_attach() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RibSession::new(3);
        session.attach(tx).unwrap();
        assert!(session.is_connected());

        let commands: Vec<Command> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.command())
            .collect();
        assert_eq!(commands, BOOTSTRAP.to_vec());
    }

    #[test]
    fn test_disconnected_announce_is_noop() {
        let session = RibSession::default();
        assert!(!session.is_connected());
        session.announce(
            RouteAction::Add,
            CacheType::Dynamic,
            &prefix("10.0.0.0/8"),
            Some(1),
            None,
            0,
        );
        assert!(matches!(
            session.send(ZapiFrame::hello(route_type::NHRP, 0)),
            Err(NhrpRouteError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_channel_counts_as_disconnected() {
        let (mut session, rx) = attached();
        drop(rx);
        assert!(!session.is_connected());
        session.announce(
            RouteAction::Add,
            CacheType::Dynamic,
            &prefix("10.0.0.0/8"),
            Some(1),
            None,
            0,
        );
        session.detach();
        assert!(!session.is_connected());
    }

    #[test]
    fn test_announce_sends_one_message() {
        let (session, mut rx) = attached();
        session.announce(
            RouteAction::Delete,
            CacheType::Dynamic,
            &prefix("10.0.0.0/24"),
            Some(4),
            Some(&addr("10.0.0.1")),
            1400,
        );

        let frame = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(frame.command(), Command::RouteDelete);

        let route = frame.decode_route().unwrap();
        assert_eq!(route.route_type, route_type::NHRP);
        assert_eq!(route.flags, route_flag::ALLOW_RECURSION);
        assert_eq!(route.mtu, Some(1400));
        assert_eq!(
            route.nexthops,
            vec![ZapiNexthop::new(NexthopGate::AddressIfindex(addr("10.0.0.1"), 4))]
        );
    }

    #[test]
    fn test_negative_is_blackhole_reject() {
        let route = build_route(
            CacheType::Negative,
            &prefix("10.9.0.0/16"),
            Some(4),
            Some(&addr("10.0.0.1")),
            0,
            0,
        );
        assert_eq!(route.flags, route_flag::ALLOW_RECURSION);
        assert_eq!(
            route.nexthops,
            vec![ZapiNexthop::new(NexthopGate::Blackhole(BlackholeType::Reject))]
        );
        assert_eq!(route.mtu, None);
    }

    #[test]
    fn test_non_redistributable_is_fib_override() {
        for cache_type in [CacheType::Local, CacheType::Cached, CacheType::Incomplete] {
            let route = build_route(cache_type, &prefix("10.0.0.5/32"), Some(4), None, 0, 0);
            assert!(route.has_flag(route_flag::FIB_OVERRIDE));
            assert!(route.has_flag(route_flag::ALLOW_RECURSION));
        }
        for cache_type in [CacheType::Dynamic, CacheType::Nhs, CacheType::Static] {
            let route = build_route(cache_type, &prefix("10.0.0.5/32"), Some(4), None, 0, 0);
            assert!(!route.has_flag(route_flag::FIB_OVERRIDE));
        }
    }

    #[test]
    fn test_nexthop_variants() {
        let host = prefix("2001:db8::5/128");
        let own = addr("2001:db8::5");

        let route = build_route(CacheType::Dynamic, &host, Some(4), Some(&own), 0, 0);
        assert_eq!(route.nexthops, vec![ZapiNexthop::new(NexthopGate::Ifindex(4))]);

        let route = build_route(CacheType::Dynamic, &host, None, Some(&own), 0, 0);
        assert!(route.nexthops.is_empty());

        let route = build_route(CacheType::Dynamic, &host, None, Some(&addr("2001:db8::1")), 0, 0);
        assert_eq!(
            route.nexthops,
            vec![ZapiNexthop::new(NexthopGate::Address(addr("2001:db8::1")))]
        );

        let mut wire = bytes::BytesMut::new();
        route.encode(&mut wire);
        // message bits sit at offset 7, first nexthop type after the /128 prefix
        assert_eq!(wire[7], message::NEXTHOP);
        assert_eq!(wire[11 + 16 + 2 + 4], nexthop_type::IPV6);
    }

    struct Env {
        store: RouteStore,
        interfaces: InterfaceTable,
        cache: BindingCache,
        shortcuts: Vec<(IpPrefix, bool)>,
        events: Vec<(IfIndex, InterfaceEvent)>,
    }

    impl Env {
        fn new() -> Self {
            let mut interfaces = InterfaceTable::new();
            let mut gre = Interface::new("gre1", 5).with_address(prefix("2001:db8::1/64"));
            gre.afi_mut(AddressFamily::Ipv6).configured = true;
            interfaces.insert(gre);
            Self {
                store: RouteStore::new(),
                interfaces,
                cache: BindingCache::new(),
                shortcuts: Vec::new(),
                events: Vec::new(),
            }
        }

        fn handle(&mut self, frame: &ZapiFrame) -> Result<()> {
            let shortcuts = &mut self.shortcuts;
            let events = &mut self.events;
            let mut on_prefix = |p: &IpPrefix, deleted: bool| shortcuts.push((*p, deleted));
            let mut on_event = |i: IfIndex, e: InterfaceEvent| events.push((i, e));
            let mut collab = Collaborators {
                interfaces: &mut self.interfaces,
                cache: &mut self.cache,
                shortcuts: &mut on_prefix,
                notifier: &mut on_event,
            };
            handle_redistributed_route(&mut self.store, &mut collab, frame)
        }
    }

    fn redistributed(command: Command, route: &ZapiRoute) -> ZapiFrame {
        ZapiFrame::route(command, VRF_DEFAULT, route)
    }

    #[test]
    fn test_inbound_add_and_delete() {
        let mut env = Env::new();
        let mut route = ZapiRoute::new(route_type::KERNEL, prefix("10.0.0.0/8"));
        route
            .nexthops
            .push(ZapiNexthop::new(NexthopGate::AddressIfindex(addr("192.0.2.1"), 5)));

        env.handle(&redistributed(Command::RedistributeRouteAdd, &route)).unwrap();
        let info = env.store.lookup_exact(&prefix("10.0.0.0/8")).unwrap();
        assert_eq!(info.via, Some(addr("192.0.2.1")));
        assert_eq!(info.ifindex, Some(5));

        env.handle(&redistributed(Command::RedistributeRouteDel, &route)).unwrap();
        assert!(env.store.is_empty());
        assert_eq!(
            env.shortcuts,
            vec![(prefix("10.0.0.0/8"), false), (prefix("10.0.0.0/8"), true)]
        );
    }

    #[test]
    fn test_inbound_unknown_interface_is_null() {
        let mut env = Env::new();
        let mut route = ZapiRoute::new(route_type::STATIC, prefix("10.0.0.0/8"));
        route.nexthops.push(ZapiNexthop::new(NexthopGate::Ifindex(42)));

        env.handle(&redistributed(Command::RedistributeRouteAdd, &route)).unwrap();
        let info = env.store.lookup_exact(&prefix("10.0.0.0/8")).unwrap();
        assert_eq!(info.via, Some(addr("0.0.0.0")));
        assert_eq!(info.ifindex, None);
    }

    #[test]
    fn test_inbound_ignored_routes() {
        let mut env = Env::new();
        let nh = ZapiNexthop::new(NexthopGate::AddressIfindex(addr("2001:db8::ffff"), 5));

        let mut srcdest = ZapiRoute::new(route_type::KERNEL, prefix("::/0"));
        srcdest.src_prefix = Some(prefix("2001:db8:ff::/48"));
        srcdest.nexthops.push(nh.clone());

        let mut own = ZapiRoute::new(route_type::NHRP, prefix("::/0"));
        own.nexthops.push(nh.clone());

        let mut pbr = ZapiRoute::new(route_type::PBR, prefix("::/0"));
        pbr.nexthops.push(nh);

        for route in [srcdest, own, pbr] {
            env.handle(&redistributed(Command::RedistributeRouteAdd, &route)).unwrap();
        }
        assert!(env.store.is_empty());
        assert!(env.shortcuts.is_empty());
        assert!(env.events.is_empty());
    }

    #[test]
    fn test_inbound_ipv6_default_runs_selection() {
        let mut env = Env::new();
        let mut route = ZapiRoute::new(route_type::KERNEL, prefix("::/0"));
        route
            .nexthops
            .push(ZapiNexthop::new(NexthopGate::AddressIfindex(addr("2001:db8::ffff"), 5)));

        env.handle(&redistributed(Command::RedistributeRouteAdd, &route)).unwrap();
        assert_eq!(env.events, vec![(5, InterfaceEvent::NbmaAddressChanged)]);
        assert_eq!(env.cache.get(5, &addr("2001:db8::1")).unwrap().cache_type, CacheType::Local);
    }

    #[test]
    fn test_inbound_malformed_is_decode_error() {
        let mut env = Env::new();
        let frame = ZapiFrame::new(
            Command::RedistributeRouteAdd,
            VRF_DEFAULT,
            bytes::Bytes::from_static(&[1, 0, 0]),
        );
        assert!(matches!(env.handle(&frame), Err(NhrpRouteError::Decode(_))));
        assert!(env.store.is_empty());
    }
}
