//! Allowed-IP routing table
//!
//! Maps IP ranges to the peer that owns them. A range has at most one owner;
//! inserting it for another peer moves it. Lookups pick the longest
//! matching prefix.

use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Longest-prefix-match table from IP ranges to owners
#[derive(Debug, Clone)]
pub struct AllowedIps<T> {
    entries: Vec<(IpNet, T)>,
}

impl<T> Default for AllowedIps<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> AllowedIps<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `net` to `owner`, taking it from any previous owner
    pub fn insert(&mut self, net: IpNet, owner: T) {
        let net = net.trunc();
        match self.entries.iter_mut().find(|(n, _)| *n == net) {
            Some(entry) => entry.1 = owner,
            None => self.entries.push((net, owner)),
        }
    }

    /// Drop every range owned by `owner`
    pub fn remove_owner(&mut self, owner: &T) {
        self.entries.retain(|(_, o)| o != owner);
    }

    /// Ranges owned by `owner`, in insertion order
    pub fn nets_for(&self, owner: &T) -> Vec<IpNet> {
        self.entries
            .iter()
            .filter(|(_, o)| o == owner)
            .map(|(n, _)| *n)
            .collect()
    }

    /// Owner of the most specific range containing `addr`
    pub fn lookup(&self, addr: IpAddr) -> Option<T> {
        self.entries
            .iter()
            .filter(|(net, _)| net.contains(&addr))
            .max_by_key(|(net, _)| net.prefix_len())
            .map(|(_, owner)| *owner)
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Destination address of an IP packet
pub fn destination(packet: &[u8]) -> Option<IpAddr> {
    match packet.first()? >> 4 {
        4 if packet.len() >= 20 => {
            let octets: [u8; 4] = packet[16..20].try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        6 if packet.len() >= 40 => {
            let octets: [u8; 16] = packet[24..40].try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
