//! Declarative device configuration and runtime snapshots
//!
//! [`DeviceConfig`] describes a full or partial change to a device and is
//! applied atomically by a control plane. [`Device`] is the read-only view
//! of a device's live state returned by a control plane.

use crate::wireguard::{PresharedKey, PrivateKey, PublicKey};
use ipnet::IpNet;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

/// Declarative update for one device
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// New private key, if it should change
    pub private_key: Option<PrivateKey>,
    /// New listen port, if it should change
    pub listen_port: Option<u16>,
    /// Drop every existing peer before applying `peers`
    pub replace_peers: bool,
    /// Per-peer changes, applied in order
    pub peers: Vec<PeerConfig>,
}

impl DeviceConfig {
    /// Check whether applying this update would change nothing
    pub fn is_empty(&self) -> bool {
        self.private_key.is_none()
            && self.listen_port.is_none()
            && !self.replace_peers
            && self.peers.is_empty()
    }
}

/// Declarative update for one peer, identified by its public key
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Peer's public key
    pub public_key: PublicKey,
    /// Remove the peer instead of creating or updating it
    pub remove: bool,
    /// Preshared key to set
    pub preshared_key: Option<PresharedKey>,
    /// Endpoint to set
    pub endpoint: Option<SocketAddr>,
    /// Persistent keepalive interval to set (zero disables)
    pub persistent_keepalive_interval: Option<Duration>,
    /// Replace the allowed IPs instead of adding to them
    pub replace_allowed_ips: bool,
    /// Allowed IP ranges
    pub allowed_ips: Vec<IpNet>,
}

impl PeerConfig {
    /// Create an update that only names the peer
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            remove: false,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive_interval: None,
            replace_allowed_ips: false,
            allowed_ips: Vec::new(),
        }
    }

    /// Create an update that removes the peer
    pub fn removal(public_key: PublicKey) -> Self {
        Self {
            remove: true,
            ..Self::new(public_key)
        }
    }
}

/// Runtime snapshot of a device
#[derive(Debug, Clone)]
pub struct Device {
    /// Interface name
    pub name: String,
    /// Configured private key, if any
    pub private_key: Option<PrivateKey>,
    /// Public key derived from the private key
    pub public_key: Option<PublicKey>,
    /// Bound UDP port
    pub listen_port: u16,
    /// Current peers
    pub peers: Vec<Peer>,
}

impl Device {
    /// Create an empty snapshot for the named device
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            private_key: None,
            public_key: None,
            listen_port: 0,
            peers: Vec::new(),
        }
    }

    /// Find a peer by public key
    pub fn peer(&self, public_key: &PublicKey) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.public_key == public_key)
    }
}

/// Runtime state of one peer
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer's public key
    pub public_key: PublicKey,
    /// Preshared key, if one is set
    pub preshared_key: Option<PresharedKey>,
    /// Current endpoint
    pub endpoint: Option<SocketAddr>,
    /// Persistent keepalive interval
    pub persistent_keepalive_interval: Option<Duration>,
    /// Time of the last completed handshake
    pub last_handshake: Option<SystemTime>,
    /// Bytes received from this peer
    pub rx_bytes: u64,
    /// Bytes sent to this peer
    pub tx_bytes: u64,
    /// Allowed IP ranges
    pub allowed_ips: Vec<IpNet>,
    /// Protocol version
    pub protocol_version: u32,
}

impl Peer {
    /// Create a peer with no traffic and no allowed IPs
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive_interval: None,
            last_handshake: None,
            rx_bytes: 0,
            tx_bytes: 0,
            allowed_ips: Vec::new(),
            protocol_version: 1,
        }
    }
}
