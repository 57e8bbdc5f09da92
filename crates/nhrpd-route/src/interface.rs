//! Interface registry consumed by the route core
//!
//! The daemon's interface layer owns interface configuration. The route core
//! only needs index lookups, the connected address list and the per-family
//! NBMA metadata, which it reads during resolution and rewrites during IPv6
//! primary address selection.

use crate::types::{IfIndex, InterfaceEvent};
use nhrp_types::{AddressFamily, IpAddress, IpPrefix};
use std::collections::HashMap;

/// Per-address-family NBMA metadata of an interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AfiData {
    /// NBMA network identifier, 0 when unset
    pub network_id: u32,
    /// Address this node currently advertises as its identity on the interface
    pub nbma_address: Option<IpAddress>,
    /// Whether the address slot is administratively configured
    pub configured: bool,
}

/// An interface as seen by the route core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub ifindex: IfIndex,
    /// Connected addresses with their prefix length (e.g. 2001:db8::1/64)
    pub connected: Vec<IpPrefix>,
    ipv4: AfiData,
    ipv6: AfiData,
}

impl Interface {
    pub fn new(name: impl Into<String>, ifindex: IfIndex) -> Self {
        Self {
            name: name.into(),
            ifindex,
            connected: Vec::new(),
            ipv4: AfiData::default(),
            ipv6: AfiData::default(),
        }
    }

    /// Adds a connected address.
    pub fn with_address(mut self, prefix: IpPrefix) -> Self {
        self.connected.push(prefix);
        self
    }

    /// Sets the NBMA network id for a family.
    pub fn with_network_id(mut self, family: AddressFamily, network_id: u32) -> Self {
        self.afi_mut(family).network_id = network_id;
        self
    }

    pub fn afi(&self, family: AddressFamily) -> &AfiData {
        match family {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    pub fn afi_mut(&mut self, family: AddressFamily) -> &mut AfiData {
        match family {
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    pub fn network_id(&self, family: AddressFamily) -> u32 {
        self.afi(family).network_id
    }
}

/// Index-based interface lookup
pub trait InterfaceRegistry {
    fn by_index(&self, ifindex: IfIndex) -> Option<&Interface>;

    fn by_index_mut(&mut self, ifindex: IfIndex) -> Option<&mut Interface>;
}

/// Receives interface events raised by the route core
pub trait InterfaceNotifier {
    fn notify(&mut self, ifindex: IfIndex, event: InterfaceEvent);
}

impl<F> InterfaceNotifier for F
where
    F: FnMut(IfIndex, InterfaceEvent),
{
    fn notify(&mut self, ifindex: IfIndex, event: InterfaceEvent) {
        self(ifindex, event)
    }
}

/// HashMap-backed interface registry
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: HashMap<IfIndex, Interface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an interface, returning the previous one.
    pub fn insert(&mut self, iface: Interface) -> Option<Interface> {
        self.interfaces.insert(iface.ifindex, iface)
    }

    pub fn remove(&mut self, ifindex: IfIndex) -> Option<Interface> {
        self.interfaces.remove(&ifindex)
    }

    pub fn by_name(&self, name: &str) -> Option<&Interface> {
        self.interfaces.values().find(|iface| iface.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl InterfaceRegistry for InterfaceTable {
    fn by_index(&self, ifindex: IfIndex) -> Option<&Interface> {
        self.interfaces.get(&ifindex)
    }

    fn by_index_mut(&mut self, ifindex: IfIndex) -> Option<&mut Interface> {
        self.interfaces.get_mut(&ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_afi_data_is_per_family() {
        let mut iface = Interface::new("gre1", 5).with_network_id(AddressFamily::Ipv6, 9);
        assert_eq!(iface.network_id(AddressFamily::Ipv6), 9);
        assert_eq!(iface.network_id(AddressFamily::Ipv4), 0);

        iface.afi_mut(AddressFamily::Ipv4).configured = true;
        assert!(iface.afi(AddressFamily::Ipv4).configured);
        assert!(!iface.afi(AddressFamily::Ipv6).configured);
    }

    #[test]
    fn test_table_lookup() {
        let mut table = InterfaceTable::new();
        assert!(table.is_empty());
        table.insert(Interface::new("gre1", 5));
        table.insert(Interface::new("eth0", 2));

        assert_eq!(table.len(), 2);
        assert_eq!(table.by_index(5).map(|i| i.name.as_str()), Some("gre1"));
        assert_eq!(table.by_name("eth0").map(|i| i.ifindex), Some(2));
        assert!(table.by_index(7).is_none());

        table.by_index_mut(2).unwrap().connected.push("10.0.0.1/24".parse().unwrap());
        assert_eq!(table.by_index(2).unwrap().connected.len(), 1);
    }

    #[test]
    fn test_closure_notifier() {
        let mut seen = Vec::new();
        {
            let mut notifier =
                |ifindex: IfIndex, event: InterfaceEvent| seen.push((ifindex, event));
            notifier.notify(3, InterfaceEvent::NbmaAddressChanged);
        }
        assert_eq!(seen, vec![(3, InterfaceEvent::NbmaAddressChanged)]);
    }
}
