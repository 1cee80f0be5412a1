//! Kernel control plane through `wg(8)`
//!
//! Key material never appears on the command line: private and preshared
//! keys are written to 0600 files in a private temporary directory and
//! passed by path.

use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig, Peer, PeerConfig, PresharedKey, PrivateKey, PublicKey};
use ipnet::IpNet;
use std::collections::HashSet;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// `wg(8)` wrapper
#[derive(Debug, Clone)]
pub struct WgTool {
    program: String,
}

impl Default for WgTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WgTool {
    /// Use `wg` from `PATH`
    pub fn new() -> Self {
        Self {
            program: "wg".to_string(),
        }
    }

    /// Fetch a device snapshot with `wg show <name> dump`
    pub async fn show(&self, name: &str) -> Result<Device> {
        let output = self.run(&["show".to_string(), name.to_string(), "dump".to_string()]).await?;
        parse_dump(name, &output)
    }

    /// Apply a configuration with `wg set`
    pub async fn set(&self, name: &str, config: &DeviceConfig) -> Result<()> {
        if config.is_empty() {
            return Ok(());
        }

        let current = if needs_snapshot(config) {
            Some(self.show(name).await?)
        } else {
            None
        };

        let key_dir = TempDir::new().map_err(|e| {
            WgEmbedError::Resource(format!("Failed to create key directory: {}", e))
        })?;
        let args = build_set_args(name, config, current.as_ref(), &key_dir)?;
        self.run(&args).await?;
        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!("Executing command: {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                WgEmbedError::Resource(format!("Failed to execute {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!("{} {} failed: {}", self.program, args[0], stderr.trim());
            if stderr.contains("No such device") {
                return Err(WgEmbedError::NotFound(message));
            }
            return Err(WgEmbedError::ControlPlane(message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// `wg set` always replaces peers' allowed IPs, so additive updates and
/// peer replacement need the current state
fn needs_snapshot(config: &DeviceConfig) -> bool {
    config.replace_peers
        || config
            .peers
            .iter()
            .any(|p| !p.remove && !p.replace_allowed_ips && !p.allowed_ips.is_empty())
}

fn build_set_args(
    name: &str,
    config: &DeviceConfig,
    current: Option<&Device>,
    key_dir: &TempDir,
) -> Result<Vec<String>> {
    let mut args = vec!["set".to_string(), name.to_string()];

    if let Some(key) = &config.private_key {
        let path = key_dir.path().join("private.key");
        key.save_to_file(&path)?;
        args.push("private-key".to_string());
        args.push(path.display().to_string());
    }

    if let Some(port) = config.listen_port {
        args.push("listen-port".to_string());
        args.push(port.to_string());
    }

    if config.replace_peers {
        let declared: HashSet<&PublicKey> = config.peers.iter().map(|p| &p.public_key).collect();
        for peer in current.map(|d| d.peers.as_slice()).unwrap_or_default() {
            if !declared.contains(&peer.public_key) {
                args.extend(["peer".to_string(), peer.public_key.to_base64(), "remove".to_string()]);
            }
        }
    }

    for (index, peer) in config.peers.iter().enumerate() {
        args.push("peer".to_string());
        args.push(peer.public_key.to_base64());

        if peer.remove {
            args.push("remove".to_string());
            continue;
        }

        if let Some(psk) = &peer.preshared_key {
            let path = key_dir.path().join(format!("peer{}.psk", index));
            psk.save_to_file(&path)?;
            args.push("preshared-key".to_string());
            args.push(path.display().to_string());
        }

        if let Some(endpoint) = peer.endpoint {
            args.push("endpoint".to_string());
            args.push(endpoint.to_string());
        }

        if let Some(interval) = peer.persistent_keepalive_interval {
            args.push("persistent-keepalive".to_string());
            args.push(interval.as_secs().to_string());
        }

        if let Some(ips) = allowed_ips_arg(peer, current, config.replace_peers) {
            args.push("allowed-ips".to_string());
            args.push(ips);
        }
    }

    Ok(args)
}

fn allowed_ips_arg(peer: &PeerConfig, current: Option<&Device>, replace_peers: bool) -> Option<String> {
    let mut ips: Vec<IpNet> = Vec::new();

    if !peer.replace_allowed_ips && !replace_peers {
        if peer.allowed_ips.is_empty() {
            return None;
        }
        if let Some(existing) = current.and_then(|d| d.peer(&peer.public_key)) {
            ips.extend(existing.allowed_ips.iter().copied());
        }
    }

    for ip in &peer.allowed_ips {
        if !ips.contains(ip) {
            ips.push(*ip);
        }
    }

    Some(
        ips.iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Parse `wg show <name> dump` output
///
/// The first line describes the device, each further line one peer. Fields
/// are tab separated and absent values read `(none)` or `off`.
pub fn parse_dump(name: &str, dump: &str) -> Result<Device> {
    let mut lines = dump.lines().filter(|l| !l.trim().is_empty());
    let mut device = Device::new(name);

    let header = lines
        .next()
        .ok_or_else(|| WgEmbedError::ControlPlane("empty wg dump".to_string()))?;
    let fields: Vec<&str> = header.split('\t').collect();
    if fields.len() < 3 {
        return Err(WgEmbedError::ControlPlane(format!(
            "malformed wg dump header: {:?}",
            header
        )));
    }
    if let Some(key) = optional(fields[0]) {
        let key = PrivateKey::from_base64(key)?;
        device.public_key = Some(key.public_key());
        device.private_key = Some(key);
    }
    device.listen_port = parse_field(fields[2], "listen port")?;

    for line in lines {
        device.peers.push(parse_dump_peer(line)?);
    }

    Ok(device)
}

fn parse_dump_peer(line: &str) -> Result<Peer> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(WgEmbedError::ControlPlane(format!(
            "malformed wg dump peer line: {:?}",
            line
        )));
    }

    let mut peer = Peer::new(PublicKey::from_base64(fields[0])?);

    if let Some(psk) = optional(fields[1]) {
        peer.preshared_key = Some(PresharedKey::from_base64(psk)?);
    }

    if let Some(endpoint) = optional(fields[2]) {
        peer.endpoint = Some(endpoint.parse().map_err(|e| {
            WgEmbedError::ControlPlane(format!("invalid endpoint {}: {}", endpoint, e))
        })?);
    }

    if let Some(ips) = optional(fields[3]) {
        for ip in ips.split(',') {
            peer.allowed_ips.push(ip.trim().parse().map_err(|e| {
                WgEmbedError::ControlPlane(format!("invalid allowed ip {}: {}", ip, e))
            })?);
        }
    }

    let handshake: u64 = parse_field(fields[4], "latest handshake")?;
    if handshake > 0 {
        peer.last_handshake = Some(UNIX_EPOCH + Duration::from_secs(handshake));
    }

    peer.rx_bytes = parse_field(fields[5], "rx bytes")?;
    peer.tx_bytes = parse_field(fields[6], "tx bytes")?;

    if let Some(keepalive) = optional(fields[7]) {
        let secs: u64 = parse_field(keepalive, "persistent keepalive")?;
        peer.persistent_keepalive_interval = Some(Duration::from_secs(secs));
    }

    Ok(peer)
}

fn optional(field: &str) -> Option<&str> {
    match field {
        "" | "(none)" | "off" => None,
        value => Some(value),
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    field.parse().map_err(|_| {
        WgEmbedError::ControlPlane(format!("invalid {} in wg dump: {}", what, field))
    })
}
