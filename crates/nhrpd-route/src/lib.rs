//! Route-resolution core of the NHRP daemon
//!
//! Keeps a local mirror of the system routing table learned from zebra,
//! publishes NHRP cache routes back to it, and answers "how is address X
//! reached" by combining the mirror with the NHRP peer cache.
//!
//! # Architecture
//!
//! ```text
//!   zebra (zserv.api)
//!      ^         |   REDISTRIBUTE_ROUTE_ADD / DEL
//!      |         v
//!   +--------------------------+     +------------------+
//!   | RibSession / rib_sync    |---->| addr_select      |---> NHRP cache
//!   | (ROUTE_ADD / DELETE out) |     | (IPv6 primary)   |
//!   +------------+-------------+     +------------------+
//!                v
//!          RouteStore <---- resolver ----> NHRP cache
//! ```
//!
//! Everything runs on a single-threaded event loop; peer handles are `Rc`.

pub mod addr_select;
pub mod cache;
pub mod config;
pub mod error;
pub mod interface;
pub mod resolver;
pub mod rib_sync;
pub mod route_store;
pub mod routing;
pub mod types;
pub mod zapi;

pub use cache::{BindingCache, NbmaPeer, NhrpCache};
pub use config::RoutedConfig;
pub use error::{NhrpRouteError, Result};
pub use interface::{AfiData, Interface, InterfaceNotifier, InterfaceRegistry, InterfaceTable};
pub use resolver::MAX_HOPS;
pub use rib_sync::{Collaborators, RibSession, ShortcutNotifier};
pub use route_store::{RouteInfo, RouteStore, RouteTable};
pub use routing::NhrpRouting;
pub use types::{
    CacheEntry, CacheType, Holding, IfIndex, InterfaceEvent, NextHop, Resolution, RouteAction,
    RouteType,
};
pub use zapi::{Command, ZapiCodec, ZapiFrame, ZapiRoute};
