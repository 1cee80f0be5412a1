//! Configuration management
//!
//! This module holds the structured form of an interface configuration and
//! turns it into a declarative [`DeviceConfig`]. Files use TOML with
//! wg-quick style section and key names:
//!
//! ```toml
//! [Interface]
//! PrivateKey = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
//! Address = ["10.44.0.1/24"]
//! ListenPort = 51820
//! MTU = 1420
//!
//! [[Peer]]
//! PublicKey = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
//! AllowedIPs = ["10.44.0.2/32"]
//! Endpoint = "192.0.2.1:51820"
//! PersistentKeepalive = 25
//! ```

mod toml_parser;
mod validation;

pub use validation::{
    parse_allowed_ip, parse_endpoint, parse_interface_address, validate_interface_name,
    validate_mtu,
};

use crate::error::{Result, ResultExt, WgEmbedError};
use crate::wireguard::{DeviceConfig, PeerConfig, PresharedKey, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of one WireGuard interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Device-level settings
    #[serde(rename = "Interface")]
    pub interface: InterfaceSection,

    /// Declared peers, in file order
    #[serde(rename = "Peer", default)]
    pub peers: Vec<PeerSection>,
}

/// The `[Interface]` section
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceSection {
    /// Base64-encoded private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Path to a file holding the base64-encoded private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,

    /// Local addresses (CIDR notation, e.g. "10.44.0.1/24")
    #[serde(default)]
    pub address: Vec<String>,

    /// UDP listen port (random when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// MTU override
    #[serde(rename = "MTU", skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

impl fmt::Debug for InterfaceSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceSection")
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("private_key_file", &self.private_key_file)
            .field("address", &self.address)
            .field("listen_port", &self.listen_port)
            .field("mtu", &self.mtu)
            .finish()
    }
}

/// A `[[Peer]]` section
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerSection {
    /// Base64-encoded public key
    pub public_key: String,

    /// Base64-encoded preshared key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,

    /// Allowed IP ranges (CIDR notation)
    #[serde(rename = "AllowedIPs", default)]
    pub allowed_ips: Vec<String>,

    /// Peer endpoint (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Persistent keepalive interval in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

impl fmt::Debug for PeerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSection")
            .field("public_key", &self.public_key)
            .field("preshared_key", &self.preshared_key.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_ips", &self.allowed_ips)
            .field("endpoint", &self.endpoint)
            .field("persistent_keepalive", &self.persistent_keepalive)
            .finish()
    }
}

impl InterfaceConfig {
    /// Create a configuration with only a private key
    pub fn new(private_key: &PrivateKey) -> Self {
        Self {
            interface: InterfaceSection {
                private_key: Some(private_key.to_base64()),
                ..InterfaceSection::default()
            },
            peers: Vec::new(),
        }
    }

    /// Resolve the private key from the inline value or the key file
    pub fn private_key(&self) -> Result<PrivateKey> {
        match (&self.interface.private_key, &self.interface.private_key_file) {
            (Some(_), Some(_)) => Err(WgEmbedError::Validation(
                "PrivateKey and PrivateKeyFile are mutually exclusive".to_string(),
            )),
            (Some(key), None) => PrivateKey::from_base64(key),
            (None, Some(path)) => PrivateKey::from_file(path),
            (None, None) => Err(WgEmbedError::Validation(
                "Interface has no PrivateKey".to_string(),
            )),
        }
    }

    /// Build the declarative device configuration for this file
    ///
    /// Device-level settings are set outright. Peers are merged: existing
    /// peers not declared here are left alone, and each declared peer gets
    /// exactly the allowed IPs listed for it.
    pub fn to_device_config(&self) -> Result<DeviceConfig> {
        if let Some(mtu) = self.interface.mtu {
            validate_mtu(mtu)?;
        }

        let peers = self
            .peers
            .iter()
            .enumerate()
            .map(|(index, peer)| {
                peer.to_peer_config()
                    .context(&format!("invalid peer #{}", index + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceConfig {
            private_key: Some(self.private_key()?),
            listen_port: self.interface.listen_port,
            replace_peers: false,
            peers,
        })
    }
}

impl PeerSection {
    /// Create a peer section with a public key and allowed IPs
    pub fn new(public_key: &PublicKey, allowed_ips: &[&str]) -> Self {
        Self {
            public_key: public_key.to_base64(),
            allowed_ips: allowed_ips.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Build the declarative update for this peer
    pub fn to_peer_config(&self) -> Result<PeerConfig> {
        let mut peer = PeerConfig::new(PublicKey::from_base64(&self.public_key)?);

        if let Some(psk) = &self.preshared_key {
            peer.preshared_key = Some(PresharedKey::from_base64(psk)?);
        }

        if let Some(endpoint) = &self.endpoint {
            peer.endpoint = Some(parse_endpoint(endpoint)?);
        }

        peer.persistent_keepalive_interval = self
            .persistent_keepalive
            .map(|secs| Duration::from_secs(u64::from(secs)));

        peer.replace_allowed_ips = true;
        peer.allowed_ips = self
            .allowed_ips
            .iter()
            .map(|cidr| parse_allowed_ip(cidr))
            .collect::<Result<Vec<_>>>()?;

        Ok(peer)
    }
}
