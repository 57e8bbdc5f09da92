//! Process-scoped route core context
//!
//! [`NhrpRouting`] owns the route mirror and the RIB session. The rest of the
//! daemon holds one instance and passes its own collaborators (interface
//! registry, NHRP cache, notifiers) into the calls that need them.

use crate::cache::NhrpCache;
use crate::error::Result;
use crate::interface::InterfaceRegistry;
use crate::resolver;
use crate::rib_sync::{handle_redistributed_route, Collaborators, RibSession};
use crate::route_store::RouteStore;
use crate::types::{CacheType, IfIndex, NextHop, Resolution, RouteAction};
use crate::zapi::{Command, ZapiFrame};
use nhrp_types::{IpAddress, IpPrefix};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Route store plus RIB session for one daemon process
#[derive(Debug, Default)]
pub struct NhrpRouting {
    store: RouteStore,
    session: RibSession,
}

impl NhrpRouting {
    /// Context with closed tables; call [`NhrpRouting::init`] before use.
    pub fn new(instance: u16) -> Self {
        Self {
            store: RouteStore::default(),
            session: RibSession::new(instance),
        }
    }

    /// Opens both family tables.
    pub fn init(&mut self) {
        self.store.open_tables();
        info!("Route core initialized");
    }

    /// Drops the session and every mirrored route.
    pub fn shutdown(&mut self) {
        self.session.detach();
        self.store.close_tables();
        info!("Route core shut down");
    }

    pub fn store(&self) -> &RouteStore {
        &self.store
    }

    pub fn session(&self) -> &RibSession {
        &self.session
    }

    /// Binds a new zebra connection and queues the session bootstrap.
    pub fn attach(&mut self, tx: UnboundedSender<ZapiFrame>) -> Result<()> {
        self.session.attach(tx)
    }

    pub fn detach(&mut self) {
        self.session.detach();
    }

    pub fn announce(
        &self,
        action: RouteAction,
        cache_type: CacheType,
        prefix: &IpPrefix,
        ifindex: Option<IfIndex>,
        nexthop: Option<&IpAddress>,
        mtu: u32,
    ) {
        self.session
            .announce(action, cache_type, prefix, ifindex, nexthop, mtu);
    }

    /// Marks `prefix` as reachable through NHRP interface `ifindex`, or clears
    /// the mark with `None`.
    pub fn update_nhrp_mark(&mut self, prefix: &IpPrefix, ifindex: Option<IfIndex>) -> Result<()> {
        debug!(prefix = %prefix, ifindex = ?ifindex, "NHRP route mark");
        self.store.update_nhrp_mark(prefix, ifindex)
    }

    pub fn resolve_nexthop(&self, addr: &IpAddress) -> Option<NextHop> {
        resolver::resolve_nexthop(&self.store, addr)
    }

    pub fn resolve<C: NhrpCache>(
        &self,
        interfaces: &dyn InterfaceRegistry,
        cache: &C,
        in_iface: Option<IfIndex>,
        addr: &IpAddress,
    ) -> Resolution<C::Peer> {
        resolver::resolve(&self.store, interfaces, cache, in_iface, addr)
    }

    /// Dispatches one inbound zebra frame. Commands the core does not consume
    /// are skipped.
    pub fn handle_frame<C: NhrpCache>(
        &mut self,
        collab: &mut Collaborators<'_, C>,
        frame: &ZapiFrame,
    ) -> Result<()> {
        match frame.command() {
            Command::RedistributeRouteAdd | Command::RedistributeRouteDel => {
                handle_redistributed_route(&mut self.store, collab, frame)
            }
            other => {
                debug!(command = ?other, vrf = frame.header.vrf_id, "Ignoring zebra message");
                Ok(())
            }
        }
    }
}
