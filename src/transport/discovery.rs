//! Broadcast target computation for server discovery.

use std::io;
use std::net::Ipv4Addr;

use if_addrs::IfAddr;

use crate::core::constants::{CELLULAR_INTERFACE_PREFIX, UNIVERSAL_BROADCAST};

/// One IPv4 address of a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    /// Interface name (`wlan0`, `rmnet_data0`, ...).
    pub name: String,
    /// Assigned address.
    pub ip: Ipv4Addr,
    /// Network mask.
    pub netmask: Ipv4Addr,
    /// Broadcast address reported by the OS, if any.
    pub broadcast: Option<Ipv4Addr>,
}

impl InterfaceAddr {
    /// Create an interface address without an OS-reported broadcast.
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            ip,
            netmask,
            broadcast: None,
        }
    }

    /// Check if discovery may use this interface.
    pub fn is_eligible(&self) -> bool {
        !self.ip.is_loopback() && !self.name.starts_with(CELLULAR_INTERFACE_PREFIX)
    }

    /// Directed broadcast address of the interface's subnet.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast
            .unwrap_or_else(|| Ipv4Addr::from(u32::from(self.ip) | !u32::from(self.netmask)))
    }
}

/// Broadcast addresses for discovery, in interface order and deduplicated.
///
/// Cellular and loopback interfaces are skipped. Falls back to
/// `255.255.255.255` when nothing qualifies.
pub fn broadcast_addresses(interfaces: &[InterfaceAddr]) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for iface in interfaces.iter().filter(|iface| iface.is_eligible()) {
        let addr = iface.broadcast_addr();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    if addrs.is_empty() {
        addrs.push(UNIVERSAL_BROADCAST);
    }
    addrs
}

/// IPv4 addresses of the host's network interfaces.
pub fn system_interfaces() -> io::Result<Vec<InterfaceAddr>> {
    let interfaces = if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) => Some(InterfaceAddr {
                name: iface.name,
                ip: v4.ip,
                netmask: v4.netmask,
                broadcast: v4.broadcast,
            }),
            IfAddr::V6(_) => None,
        })
        .collect();
    Ok(interfaces)
}

/// Broadcast addresses of the host, falling back to the universal broadcast
/// address if interfaces cannot be listed.
pub fn local_broadcast_addresses() -> Vec<Ipv4Addr> {
    match system_interfaces() {
        Ok(interfaces) => broadcast_addresses(&interfaces),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list network interfaces");
            vec![UNIVERSAL_BROADCAST]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: [u8; 4], mask: [u8; 4]) -> InterfaceAddr {
        InterfaceAddr::new(name, Ipv4Addr::from(ip), Ipv4Addr::from(mask))
    }

    #[test]
    fn test_subnet_broadcast() {
        let wlan = iface("wlan0", [192, 168, 1, 37], [255, 255, 255, 0]);
        assert_eq!(wlan.broadcast_addr(), Ipv4Addr::new(192, 168, 1, 255));

        let wide = iface("eth0", [10, 1, 2, 3], [255, 0, 0, 0]);
        assert_eq!(wide.broadcast_addr(), Ipv4Addr::new(10, 255, 255, 255));
    }

    #[test]
    fn test_reported_broadcast_wins() {
        let mut wlan = iface("wlan0", [192, 168, 1, 37], [255, 255, 255, 0]);
        wlan.broadcast = Some(Ipv4Addr::new(192, 168, 1, 127));
        assert_eq!(wlan.broadcast_addr(), Ipv4Addr::new(192, 168, 1, 127));
    }

    #[test]
    fn test_excludes_cellular_and_loopback() {
        let interfaces = vec![
            iface("lo", [127, 0, 0, 1], [255, 0, 0, 0]),
            iface("rmnet_data0", [100, 64, 3, 9], [255, 255, 255, 252]),
            iface("wlan0", [192, 168, 1, 37], [255, 255, 255, 0]),
        ];
        assert_eq!(
            broadcast_addresses(&interfaces),
            vec![Ipv4Addr::new(192, 168, 1, 255)]
        );
    }

    #[test]
    fn test_dedupes_shared_subnet() {
        let interfaces = vec![
            iface("wlan0", [192, 168, 1, 37], [255, 255, 255, 0]),
            iface("wlan0", [192, 168, 1, 38], [255, 255, 255, 0]),
            iface("eth0", [10, 0, 0, 2], [255, 255, 0, 0]),
        ];
        assert_eq!(
            broadcast_addresses(&interfaces),
            vec![Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::new(10, 0, 255, 255)]
        );
    }

    #[test]
    fn test_fallback_to_universal_broadcast() {
        assert_eq!(broadcast_addresses(&[]), vec![UNIVERSAL_BROADCAST]);

        let only_cellular = vec![iface("rmnet0", [100, 64, 0, 1], [255, 255, 255, 0])];
        assert_eq!(broadcast_addresses(&only_cellular), vec![UNIVERSAL_BROADCAST]);
    }
}
