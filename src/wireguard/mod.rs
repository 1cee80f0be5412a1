//! WireGuard keys and device configuration types
//!
//! This module holds the vocabulary shared by the control plane, the
//! userspace engine and the interface manager.

mod keys;
mod types;

pub use keys::{KeyPair, PresharedKey, PrivateKey, PublicKey, KEY_LEN};
pub use types::{Device, DeviceConfig, Peer, PeerConfig};

/// Default MTU for WireGuard devices
pub const DEFAULT_MTU: u32 = 1420;
