//! UAPI text protocol
//!
//! Requests and responses are `key=value` lines terminated by an empty
//! line. A `set` request starts with `set=1`, a `get` request is `get=1`
//! alone. Every response ends with `errno=N`, zero meaning success. Keys
//! travel as lowercase hex.

use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig, Peer, PeerConfig, PresharedKey, PrivateKey, PublicKey};
use ipnet::IpNet;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::{Duration, UNIX_EPOCH};

/// Request header for reading device state
pub const GET_REQUEST: &str = "get=1\n\n";

/// Operation named by the first line of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `get=1`
    Get,
    /// `set=1`
    Set,
}

impl Operation {
    /// Parse a request header line
    pub fn from_header(line: &str) -> Result<Self> {
        match line.trim_end() {
            "get=1" => Ok(Operation::Get),
            "set=1" => Ok(Operation::Set),
            other => Err(WgEmbedError::ControlPlane(format!(
                "invalid UAPI operation: {:?}",
                other
            ))),
        }
    }
}

/// Encode a `set` request for the given configuration
pub fn encode_set(config: &DeviceConfig) -> String {
    let mut out = String::from("set=1\n");

    if let Some(key) = &config.private_key {
        let _ = writeln!(out, "private_key={}", key.to_hex());
    }
    if let Some(port) = config.listen_port {
        let _ = writeln!(out, "listen_port={}", port);
    }
    if config.replace_peers {
        out.push_str("replace_peers=true\n");
    }

    for peer in &config.peers {
        let _ = writeln!(out, "public_key={}", peer.public_key.to_hex());
        if peer.remove {
            out.push_str("remove=true\n");
            continue;
        }
        if let Some(psk) = &peer.preshared_key {
            let _ = writeln!(out, "preshared_key={}", psk.to_hex());
        }
        if let Some(endpoint) = peer.endpoint {
            let _ = writeln!(out, "endpoint={}", endpoint);
        }
        if let Some(interval) = peer.persistent_keepalive_interval {
            let _ = writeln!(out, "persistent_keepalive_interval={}", interval.as_secs());
        }
        if peer.replace_allowed_ips {
            out.push_str("replace_allowed_ips=true\n");
        }
        for ip in &peer.allowed_ips {
            let _ = writeln!(out, "allowed_ip={}", ip);
        }
    }

    out.push('\n');
    out
}

/// Decode the body of a `set` request (the lines after `set=1`)
pub fn decode_set<'a, I>(lines: I) -> Result<DeviceConfig>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut config = DeviceConfig::default();

    for line in lines {
        let (key, value) = split_line(line)?;
        match key {
            "private_key" => {
                let key = PrivateKey::from_hex(value)?;
                config.private_key = Some(key);
            }
            "listen_port" => config.listen_port = Some(parse_number(key, value)?),
            "fwmark" => {}
            "replace_peers" => config.replace_peers = parse_bool(key, value)?,
            "public_key" => config.peers.push(PeerConfig::new(PublicKey::from_hex(value)?)),
            _ => {
                let peer = config.peers.last_mut().ok_or_else(|| {
                    WgEmbedError::ControlPlane(format!("UAPI key {} outside of a peer", key))
                })?;
                decode_peer_key(peer, key, value)?;
            }
        }
    }

    Ok(config)
}

fn decode_peer_key(peer: &mut PeerConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "remove" => peer.remove = parse_bool(key, value)?,
        "update_only" => {}
        "preshared_key" => peer.preshared_key = Some(PresharedKey::from_hex(value)?),
        "endpoint" => peer.endpoint = Some(parse_socket_addr(value)?),
        "persistent_keepalive_interval" => {
            let secs: u64 = parse_number(key, value)?;
            peer.persistent_keepalive_interval = Some(Duration::from_secs(secs));
        }
        "replace_allowed_ips" => peer.replace_allowed_ips = parse_bool(key, value)?,
        "allowed_ip" => peer.allowed_ips.push(parse_net(value)?),
        "protocol_version" => {
            if value != "1" {
                return Err(WgEmbedError::ControlPlane(format!(
                    "unsupported protocol version {}",
                    value
                )));
            }
        }
        _ => {
            return Err(WgEmbedError::ControlPlane(format!(
                "unknown UAPI key: {}",
                key
            )))
        }
    }
    Ok(())
}

/// Encode the body of a `get` response, without the errno line
pub fn encode_device(device: &Device) -> String {
    let mut out = String::new();

    if let Some(key) = &device.private_key {
        let _ = writeln!(out, "private_key={}", key.to_hex());
    }
    let _ = writeln!(out, "listen_port={}", device.listen_port);

    for peer in &device.peers {
        let _ = writeln!(out, "public_key={}", peer.public_key.to_hex());
        if let Some(psk) = &peer.preshared_key {
            let _ = writeln!(out, "preshared_key={}", psk.to_hex());
        }
        if let Some(endpoint) = peer.endpoint {
            let _ = writeln!(out, "endpoint={}", endpoint);
        }
        let keepalive = peer
            .persistent_keepalive_interval
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let _ = writeln!(out, "persistent_keepalive_interval={}", keepalive);

        let since_epoch = peer
            .last_handshake
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        let _ = writeln!(out, "last_handshake_time_sec={}", since_epoch.as_secs());
        let _ = writeln!(out, "last_handshake_time_nsec={}", since_epoch.subsec_nanos());
        let _ = writeln!(out, "tx_bytes={}", peer.tx_bytes);
        let _ = writeln!(out, "rx_bytes={}", peer.rx_bytes);
        for ip in &peer.allowed_ips {
            let _ = writeln!(out, "allowed_ip={}", ip);
        }
        let _ = writeln!(out, "protocol_version={}", peer.protocol_version);
    }

    out
}

/// Decode a full `get` response into a device snapshot
///
/// The response must end with `errno=0`; a non-zero errno is a
/// `ControlPlane` error.
pub fn decode_device(name: &str, response: &str) -> Result<Device> {
    let mut device = Device::new(name);
    let mut errno = None;
    let mut handshake_sec = 0u64;
    let mut handshake_nsec = 0u32;

    for line in response.lines().take_while(|l| !l.is_empty()) {
        let (key, value) = split_line(line)?;
        match key {
            "errno" => errno = Some(parse_number::<i32>(key, value)?),
            "private_key" => {
                let key = PrivateKey::from_hex(value)?;
                device.public_key = Some(key.public_key());
                device.private_key = Some(key);
            }
            "listen_port" => device.listen_port = parse_number(key, value)?,
            "fwmark" => {}
            "public_key" => {
                finish_handshake(&mut device, handshake_sec, handshake_nsec);
                handshake_sec = 0;
                handshake_nsec = 0;
                device.peers.push(Peer::new(PublicKey::from_hex(value)?));
            }
            _ => {
                let peer = device.peers.last_mut().ok_or_else(|| {
                    WgEmbedError::ControlPlane(format!("UAPI key {} outside of a peer", key))
                })?;
                match key {
                    "preshared_key" => {
                        let psk = PresharedKey::from_hex(value)?;
                        peer.preshared_key = (!psk.is_zero()).then_some(psk);
                    }
                    "endpoint" => peer.endpoint = Some(parse_socket_addr(value)?),
                    "persistent_keepalive_interval" => {
                        let secs: u64 = parse_number(key, value)?;
                        peer.persistent_keepalive_interval =
                            (secs > 0).then(|| Duration::from_secs(secs));
                    }
                    "last_handshake_time_sec" => handshake_sec = parse_number(key, value)?,
                    "last_handshake_time_nsec" => handshake_nsec = parse_number(key, value)?,
                    "tx_bytes" => peer.tx_bytes = parse_number(key, value)?,
                    "rx_bytes" => peer.rx_bytes = parse_number(key, value)?,
                    "allowed_ip" => peer.allowed_ips.push(parse_net(value)?),
                    "protocol_version" => peer.protocol_version = parse_number(key, value)?,
                    // Unknown read-only keys from newer implementations
                    _ => {}
                }
            }
        }
    }
    finish_handshake(&mut device, handshake_sec, handshake_nsec);

    match errno {
        Some(0) => Ok(device),
        Some(code) => Err(errno_error(code)),
        None => Err(WgEmbedError::ControlPlane(
            "UAPI response is missing errno".to_string(),
        )),
    }
}

fn finish_handshake(device: &mut Device, sec: u64, nsec: u32) {
    if let Some(peer) = device.peers.last_mut() {
        if sec != 0 || nsec != 0 {
            peer.last_handshake = Some(UNIX_EPOCH + Duration::new(sec, nsec));
        }
    }
}

/// Check the errno line of a `set` response
pub fn check_errno(response: &str) -> Result<()> {
    let line = response
        .lines()
        .find(|l| l.starts_with("errno="))
        .ok_or_else(|| {
            WgEmbedError::ControlPlane("UAPI response is missing errno".to_string())
        })?;
    let (key, value) = split_line(line)?;
    match parse_number::<i32>(key, value)? {
        0 => Ok(()),
        code => Err(errno_error(code)),
    }
}

/// Render the errno trailer of a response
pub fn errno_line(errno: i32) -> String {
    format!("errno={}\n\n", errno)
}

fn errno_error(code: i32) -> WgEmbedError {
    WgEmbedError::ControlPlane(format!(
        "device returned errno {}: {}",
        code,
        std::io::Error::from_raw_os_error(code)
    ))
}

fn split_line(line: &str) -> Result<(&str, &str)> {
    line.split_once('=').ok_or_else(|| {
        WgEmbedError::ControlPlane(format!("malformed UAPI line: {:?}", line))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(WgEmbedError::ControlPlane(format!(
            "invalid boolean for {}: {}",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        WgEmbedError::ControlPlane(format!("invalid number for {}: {}", key, value))
    })
}

fn parse_socket_addr(value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| WgEmbedError::ControlPlane(format!("invalid endpoint {}: {}", value, e)))
}

fn parse_net(value: &str) -> Result<IpNet> {
    value
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| WgEmbedError::ControlPlane(format!("invalid allowed_ip {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::wireguard::KeyPair;

    fn peer_update(allowed: &[&str]) -> (PeerConfig, PublicKey) {
        let key = KeyPair::generate().public;
        let mut peer = PeerConfig::new(key);
        peer.replace_allowed_ips = true;
        peer.endpoint = Some("192.0.2.10:51820".parse().unwrap());
        peer.persistent_keepalive_interval = Some(Duration::from_secs(25));
        peer.allowed_ips = allowed.iter().map(|s| s.parse().unwrap()).collect();
        (peer, key)
    }

    #[test]
    fn test_encode_set_layout() {
        let local = KeyPair::generate();
        let (peer, key) = peer_update(&["10.0.0.2/32"]);
        let config = DeviceConfig {
            private_key: Some(local.private.clone()),
            listen_port: Some(51820),
            replace_peers: false,
            peers: vec![peer, PeerConfig::removal(KeyPair::generate().public)],
        };

        let text = encode_set(&config);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "set=1");
        assert_eq!(lines[1], format!("private_key={}", local.private.to_hex()));
        assert_eq!(lines[2], "listen_port=51820");
        assert_eq!(lines[3], format!("public_key={}", key.to_hex()));
        assert!(lines.contains(&"replace_allowed_ips=true"));
        assert!(lines.contains(&"allowed_ip=10.0.0.2/32"));
        assert!(lines.contains(&"remove=true"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_decode_set_matches_encoding() {
        let (peer, key) = peer_update(&["10.0.0.2/32", "fd00::/64"]);
        let config = DeviceConfig {
            replace_peers: true,
            peers: vec![peer],
            ..DeviceConfig::default()
        };

        let text = encode_set(&config);
        let decoded = decode_set(text.lines().skip(1).take_while(|l| !l.is_empty())).unwrap();
        assert!(decoded.replace_peers);
        assert_eq!(decoded.peers.len(), 1);
        assert_eq!(decoded.peers[0].public_key, key);
        assert_eq!(decoded.peers[0].allowed_ips.len(), 2);
        assert_eq!(
            decoded.peers[0].persistent_keepalive_interval,
            Some(Duration::from_secs(25))
        );
    }

    #[test]
    fn test_decode_set_rejects_peer_key_without_peer() {
        let err = decode_set(["allowed_ip=10.0.0.0/8"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ControlPlane);
    }

    #[test]
    fn test_decode_set_rejects_bad_key() {
        assert!(decode_set(["public_key=zz"]).is_err());
        assert!(decode_set(["listen_port=notaport"]).is_err());
        assert!(decode_set(["nonsense"]).is_err());
    }

    #[test]
    fn test_decode_device() {
        let local = KeyPair::generate();
        let remote = KeyPair::generate();
        let response = format!(
            "private_key={}\nlisten_port=41414\npublic_key={}\npreshared_key={}\n\
             endpoint=[fd00::2]:51820\npersistent_keepalive_interval=0\n\
             last_handshake_time_sec=1700000000\nlast_handshake_time_nsec=5\n\
             tx_bytes=100\nrx_bytes=200\nallowed_ip=10.0.0.2/32\nprotocol_version=1\nerrno=0\n\n",
            local.private.to_hex(),
            remote.public.to_hex(),
            "0".repeat(64),
        );

        let device = decode_device("wg0", &response).unwrap();
        assert_eq!(device.name, "wg0");
        assert_eq!(device.public_key, Some(local.public));
        assert_eq!(device.listen_port, 41414);

        let peer = device.peer(&remote.public).unwrap();
        assert!(peer.preshared_key.is_none());
        assert!(peer.persistent_keepalive_interval.is_none());
        assert_eq!(peer.tx_bytes, 100);
        assert_eq!(peer.rx_bytes, 200);
        assert_eq!(
            peer.last_handshake,
            Some(UNIX_EPOCH + Duration::new(1_700_000_000, 5))
        );
        assert_eq!(peer.endpoint, Some("[fd00::2]:51820".parse().unwrap()));
    }

    #[test]
    fn test_encode_device_then_decode() {
        let local = KeyPair::generate();
        let mut device = Device::new("wg0");
        device.private_key = Some(local.private.clone());
        device.listen_port = 51820;
        let mut peer = Peer::new(KeyPair::generate().public);
        peer.allowed_ips.push("10.9.0.0/16".parse().unwrap());
        device.peers.push(peer);

        let text = encode_device(&device) + &errno_line(0);
        let decoded = decode_device("wg0", &text).unwrap();
        assert_eq!(decoded.public_key, Some(local.public));
        assert_eq!(decoded.peers.len(), 1);
        assert_eq!(decoded.peers[0].allowed_ips, device.peers[0].allowed_ips);
        assert!(decoded.peers[0].last_handshake.is_none());
    }

    #[test]
    fn test_errno() {
        assert!(check_errno("errno=0\n\n").is_ok());
        let err = check_errno("errno=22\n\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ControlPlane);
        assert!(check_errno("\n").is_err());
        assert!(decode_device("wg0", "listen_port=1\nerrno=5\n\n").is_err());
        assert!(decode_device("wg0", "listen_port=1\n\n").is_err());
    }

    #[test]
    fn test_operation_header() {
        assert_eq!(Operation::from_header("get=1\n").unwrap(), Operation::Get);
        assert_eq!(Operation::from_header("set=1").unwrap(), Operation::Set);
        assert!(Operation::from_header("put=1").is_err());
    }
}
