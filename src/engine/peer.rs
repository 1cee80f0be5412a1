//! Per-peer engine state
//!
//! Each peer owns one boringtun [`Tunn`], which represents a single pairwise
//! tunnel. The tunnel is rebuilt whenever its inputs (local key, preshared
//! key, keepalive) change.

use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Peer, PresharedKey, PrivateKey, PublicKey};
use boringtun::noise::Tunn;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

pub(crate) struct EnginePeer {
    pub public_key: PublicKey,
    pub preshared_key: Option<PresharedKey>,
    pub endpoint: Option<SocketAddr>,
    pub keepalive: Option<Duration>,
    /// Creation order, also the boringtun session index
    pub index: u32,
    /// Absent until the device has a private key
    pub tunn: Option<Tunn>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl EnginePeer {
    pub fn new(public_key: PublicKey, index: u32) -> Self {
        Self {
            public_key,
            preshared_key: None,
            endpoint: None,
            keepalive: None,
            index,
            tunn: None,
            rx_bytes: 0,
            tx_bytes: 0,
        }
    }

    /// Recreate the tunnel for the given local key
    pub fn rebuild(&mut self, private_key: Option<&PrivateKey>) -> Result<()> {
        let Some(private_key) = private_key else {
            self.tunn = None;
            return Ok(());
        };

        let tunn = Tunn::new(
            StaticSecret::from(*private_key.as_bytes()),
            X25519PublicKey::from(*self.public_key.as_bytes()),
            self.preshared_key.as_ref().map(|k| *k.as_bytes()),
            self.keepalive.map(|d| d.as_secs().min(u64::from(u16::MAX)) as u16),
            self.index,
            None,
        )
        .map_err(|e| {
            WgEmbedError::Resource(format!(
                "Failed to create tunnel for peer {}: {}",
                self.public_key, e
            ))
        })?;

        self.tunn = Some(tunn);
        Ok(())
    }

    pub fn snapshot(&self, allowed_ips: Vec<IpNet>) -> Peer {
        let mut peer = Peer::new(self.public_key);
        peer.preshared_key = self.preshared_key.clone();
        peer.endpoint = self.endpoint;
        peer.persistent_keepalive_interval = self.keepalive;
        peer.rx_bytes = self.rx_bytes;
        peer.tx_bytes = self.tx_bytes;
        peer.allowed_ips = allowed_ips;
        peer.last_handshake = self
            .tunn
            .as_ref()
            .and_then(|t| t.time_since_last_handshake())
            .and_then(|elapsed| SystemTime::now().checked_sub(elapsed));
        peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::KeyPair;

    #[test]
    fn test_rebuild_requires_private_key() {
        let mut peer = EnginePeer::new(KeyPair::generate().public, 1);
        peer.rebuild(None).unwrap();
        assert!(peer.tunn.is_none());

        let local = KeyPair::generate();
        peer.rebuild(Some(&local.private)).unwrap();
        assert!(peer.tunn.is_some());
    }

    #[test]
    fn test_snapshot_without_handshake() {
        let local = KeyPair::generate();
        let mut peer = EnginePeer::new(KeyPair::generate().public, 1);
        peer.keepalive = Some(Duration::from_secs(25));
        peer.rebuild(Some(&local.private)).unwrap();

        let snapshot = peer.snapshot(vec!["10.0.0.2/32".parse().unwrap()]);
        assert!(snapshot.last_handshake.is_none());
        assert_eq!(snapshot.persistent_keepalive_interval, Some(Duration::from_secs(25)));
        assert_eq!(snapshot.allowed_ips.len(), 1);
    }
}
