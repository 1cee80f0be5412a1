//! Configuration and peer management
//!
//! Everything here goes through the control-plane client, so it behaves the
//! same for kernel and userspace interfaces.

use super::{activation, Interface};
use crate::config::{parse_allowed_ip, InterfaceConfig};
use crate::error::{Result, ResultExt, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig, Peer, PeerConfig, PresharedKey, PublicKey};
use std::path::Path;
use tracing::{debug, error, info, warn};

impl Interface {
    /// Load a config file and apply it
    pub async fn load_config_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config =
            InterfaceConfig::from_file(path.as_ref()).context("failed to load config file")?;
        self.load_config(config).await
    }

    /// Apply a configuration, then assign its addresses and bring the link up
    ///
    /// Device settings are replaced and declared peers are merged into the
    /// existing ones. A failure part way leaves earlier steps in place.
    pub async fn load_config(&self, config: InterfaceConfig) -> Result<()> {
        let device_config = config
            .to_device_config()
            .context("invalid wireguard config")?;
        let addresses = config.interface.address.clone();
        let mtu = config.interface.mtu;

        *self.config.write().await = Some(config);

        self.apply(&device_config)
            .await
            .context("failed to configure wireguard")?;

        for address in &addresses {
            activation::set_address(self.platform.as_ref(), &self.name, address)
                .context("failed to set interface ip address")?;
        }

        activation::up(self.platform.as_ref(), &self.name, mtu)
            .context("failed to bring interface up")?;

        info!(
            "Loaded config for {} ({} peers, {} addresses)",
            self.name,
            device_config.peers.len(),
            addresses.len()
        );
        Ok(())
    }

    /// Add a peer, or replace the allowed IPs of an existing one
    ///
    /// A malformed preshared key is logged and ignored. Every CIDR is
    /// checked before anything is applied.
    pub async fn add_peer<S: AsRef<str>>(
        &self,
        public_key: &str,
        preshared_key: Option<&str>,
        allowed_ips: &[S],
    ) -> Result<()> {
        let key = PublicKey::from_base64(public_key).context("bad public key")?;

        let mut peer = PeerConfig::new(key);
        peer.replace_allowed_ips = true;

        if let Some(psk) = preshared_key.filter(|s| !s.is_empty()) {
            match PresharedKey::from_base64(psk) {
                Ok(psk) => peer.preshared_key = Some(psk),
                Err(e) => warn!("Ignoring bad preshared key for peer {}: {}", key, e),
            }
        }

        peer.allowed_ips = allowed_ips
            .iter()
            .map(|cidr| {
                parse_allowed_ip(cidr.as_ref()).context("bad CIDR value for AllowedIPs")
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Adding peer {} to {}", key, self.name);
        self.apply(&DeviceConfig {
            peers: vec![peer],
            ..DeviceConfig::default()
        })
        .await
    }

    /// Remove a peer; removing an absent peer succeeds
    pub async fn remove_peer(&self, public_key: &str) -> Result<()> {
        let key = PublicKey::from_base64(public_key).context("bad public key")?;

        debug!("Removing peer {} from {}", key, self.name);
        self.apply(&DeviceConfig {
            peers: vec![PeerConfig::removal(key)],
            ..DeviceConfig::default()
        })
        .await
    }

    /// Current peers, fetched fresh
    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.device().await?.peers)
    }

    /// Whether the device has a peer with this key
    ///
    /// Lookup failures are logged and reported as `false`.
    pub async fn has_peer(&self, public_key: &str) -> bool {
        let key = match PublicKey::from_base64(public_key) {
            Ok(key) => key,
            Err(e) => {
                error!("Failed to check peer {}: {}", public_key, e);
                return false;
            }
        };

        match self.list_peers().await {
            Ok(peers) => peers.iter().any(|p| p.public_key == key),
            Err(e) => {
                error!("Failed to list peers of {}: {}", self.name, e);
                false
            }
        }
    }

    /// A single peer by key
    pub async fn peer(&self, public_key: &str) -> Result<Peer> {
        let key = PublicKey::from_base64(public_key).context("bad public key")?;

        self.list_peers()
            .await?
            .into_iter()
            .find(|p| p.public_key == key)
            .ok_or_else(|| WgEmbedError::NotFound(format!("peer {}", public_key)))
    }

    /// Base64 public key of the device
    pub async fn public_key(&self) -> Result<String> {
        self.device()
            .await?
            .public_key
            .map(|key| key.to_base64())
            .ok_or_else(|| {
                WgEmbedError::NotFound(format!("{} has no private key configured", self.name))
            })
    }

    /// UDP listen port of the device
    pub async fn port(&self) -> Result<u16> {
        Ok(self.device().await?.listen_port)
    }

    /// Check that the device answers
    pub async fn ping(&self) -> Result<()> {
        match self.list_peers().await {
            Ok(_) => Ok(()),
            Err(_) => Err(WgEmbedError::Liveness),
        }
    }

    /// Build an update with `mutator` and apply it
    ///
    /// The mutator starts from an empty update and runs under the apply lock.
    pub async fn configure<F>(&self, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut DeviceConfig) -> Result<()> + Send,
    {
        let _guard = self.apply_lock.lock().await;

        let mut config = DeviceConfig::default();
        mutator(&mut config).context("failed to get next wireguard config")?;

        self.client.apply(&self.name, &config).await
    }

    /// Last loaded configuration
    pub async fn config(&self) -> Option<InterfaceConfig> {
        self.config.read().await.clone()
    }

    /// Full runtime snapshot of the device
    pub async fn device(&self) -> Result<Device> {
        self.client.device(&self.name).await
    }

    async fn apply(&self, config: &DeviceConfig) -> Result<()> {
        let _guard = self.apply_lock.lock().await;
        self.client.apply(&self.name, config).await
    }
}
