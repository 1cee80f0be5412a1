//! Integration tests for the interface lifecycle
//!
//! These run the userspace backend end to end: the interface manager talks
//! to the engine over a real UAPI socket in a temporary directory, while the
//! OS side is replaced by a recording platform and an in-memory TUN device.

mod common;

use common::{ipv4_packet, FakePlatform};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wg_embed::config::{InterfaceConfig, PeerSection};
use wg_embed::control::socket_path;
use wg_embed::error::ErrorKind;
use wg_embed::wireguard::{KeyPair, PresharedKey, DEFAULT_MTU};
use wg_embed::{with_platform, BackendKind, Interface, Options};

async fn userspace(dir: &TempDir, name: &str, platform: Arc<FakePlatform>) -> Interface {
    let options = Options::new(name)
        .allow_kernel_module(true)
        .socket_dir(dir.path());
    with_platform(options, platform).await.unwrap()
}

#[tokio::test]
async fn test_kernel_failure_falls_back_to_userspace() {
    let dir = TempDir::new().unwrap();
    let platform = FakePlatform::without_kernel();
    let iface = userspace(&dir, "wgfall0", platform.clone()).await;

    assert_eq!(iface.backend_kind(), BackendKind::Userspace);
    assert_eq!(
        platform.calls(),
        vec![format!("create wgfall0 {}", DEFAULT_MTU)]
    );
    // The host is described in the fallback log
    assert_eq!(platform.info_requests(), 1);
    assert!(socket_path(dir.path(), "wgfall0").exists());

    // Behaves like any other interface
    let local = KeyPair::generate();
    iface
        .load_config(InterfaceConfig::new(&local.private))
        .await
        .unwrap();
    assert_eq!(iface.public_key().await.unwrap(), local.public.to_base64());
    iface.ping().await.unwrap();

    iface.close().await.unwrap();
    assert!(!socket_path(dir.path(), "wgfall0").exists());
}

#[tokio::test]
async fn test_kernel_not_allowed_skips_kernel() {
    let dir = TempDir::new().unwrap();
    let platform = FakePlatform::without_kernel();
    let options = Options::new("wgnok0").socket_dir(dir.path());
    let iface = with_platform(options, platform.clone()).await.unwrap();

    assert_eq!(iface.backend_kind(), BackendKind::Userspace);
    assert!(platform.calls().is_empty());
    assert_eq!(platform.info_requests(), 0);
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_public_key_before_config() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgnokey0", FakePlatform::without_kernel()).await;

    let err = iface.public_key().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(iface.config().await.is_none());
    assert_ne!(iface.port().await.unwrap(), 0);
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_load_config_twice_assigns_both_addresses() {
    let dir = TempDir::new().unwrap();
    let platform = FakePlatform::without_kernel();
    let iface = userspace(&dir, "wgaddr0", platform.clone()).await;
    let local = KeyPair::generate();

    let mut first = InterfaceConfig::new(&local.private);
    first.interface.address = vec!["10.44.0.1/24".to_string()];
    first.interface.mtu = Some(1380);
    iface.load_config(first).await.unwrap();

    let mut second = InterfaceConfig::new(&local.private);
    second.interface.address = vec!["10.45.0.1/24".to_string()];
    iface.load_config(second.clone()).await.unwrap();

    let calls = platform.calls();
    let default_mtu = format!("mtu wgaddr0 {}", DEFAULT_MTU);
    let activation: Vec<&str> = calls.iter().skip(1).map(String::as_str).collect();
    assert_eq!(
        activation,
        vec![
            "address wgaddr0 10.44.0.1/24",
            "up wgaddr0",
            "mtu wgaddr0 1380",
            "address wgaddr0 10.45.0.1/24",
            "up wgaddr0",
            default_mtu.as_str(),
        ]
    );
    assert_eq!(iface.config().await, Some(second));
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_load_config_file_merges_peers() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgfile0", FakePlatform::without_kernel()).await;
    let local = KeyPair::generate();
    let declared = KeyPair::generate().public;
    let extra = KeyPair::generate().public;

    iface
        .add_peer(&extra.to_base64(), None, &["10.44.0.9/32"])
        .await
        .unwrap();

    let mut config = InterfaceConfig::new(&local.private);
    config.interface.listen_port = Some(0);
    config
        .peers
        .push(PeerSection::new(&declared, &["10.44.0.2/32"]));
    let path = dir.path().join("wgfile0.toml");
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    iface.load_config_file(&path).await.unwrap();

    // Peers already present are left alone
    assert!(iface.has_peer(&declared.to_base64()).await);
    assert!(iface.has_peer(&extra.to_base64()).await);

    let err = iface
        .load_config_file(dir.path().join("missing.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to load config file"));
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_peer_management() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgpeer0", FakePlatform::without_kernel()).await;
    iface
        .load_config(InterfaceConfig::new(&KeyPair::generate().private))
        .await
        .unwrap();

    let remote = KeyPair::generate().public.to_base64();
    iface
        .add_peer(&remote, None, &["10.0.0.2/32", "10.0.1.0/24"])
        .await
        .unwrap();
    assert!(iface.has_peer(&remote).await);

    // Re-adding replaces the allowed IPs
    iface
        .add_peer(&remote, None, &["10.0.2.0/24"])
        .await
        .unwrap();
    let peer = iface.peer(&remote).await.unwrap();
    assert_eq!(peer.allowed_ips, vec!["10.0.2.0/24".parse().unwrap()]);

    // An invalid CIDR changes nothing
    let err = iface
        .add_peer(&remote, None, &["10.0.3.0/24", "nonsense"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let peer = iface.peer(&remote).await.unwrap();
    assert_eq!(peer.allowed_ips, vec!["10.0.2.0/24".parse().unwrap()]);

    iface.remove_peer(&remote).await.unwrap();
    assert!(!iface.has_peer(&remote).await);
    assert!(iface.peer(&remote).await.unwrap_err().is_not_found());

    // Removing an absent peer succeeds
    iface.remove_peer(&remote).await.unwrap();
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_preshared_keys() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgpsk0", FakePlatform::without_kernel()).await;
    iface
        .load_config(InterfaceConfig::new(&KeyPair::generate().private))
        .await
        .unwrap();

    let malformed = KeyPair::generate().public.to_base64();
    iface
        .add_peer(&malformed, Some("not base64!"), &["10.0.0.2/32"])
        .await
        .unwrap();
    let peer = iface.peer(&malformed).await.unwrap();
    assert!(peer.preshared_key.is_none());

    let with_psk = KeyPair::generate().public.to_base64();
    let psk = PresharedKey::generate();
    iface
        .add_peer(&with_psk, Some(&psk.to_base64()), &["10.0.0.3/32"])
        .await
        .unwrap();
    let peer = iface.peer(&with_psk).await.unwrap();
    assert_eq!(peer.preshared_key, Some(psk));
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_allowed_ip_moves_to_second_peer() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgmove0", FakePlatform::without_kernel()).await;

    let first = KeyPair::generate().public.to_base64();
    let second = KeyPair::generate().public.to_base64();
    iface
        .add_peer(&first, None, &["10.0.0.2/32", "10.0.0.3/32"])
        .await
        .unwrap();
    iface
        .add_peer(&second, None, &["10.0.0.2/32"])
        .await
        .unwrap();

    let first = iface.peer(&first).await.unwrap();
    let second = iface.peer(&second).await.unwrap();
    assert_eq!(first.allowed_ips, vec!["10.0.0.3/32".parse().unwrap()]);
    assert_eq!(second.allowed_ips, vec!["10.0.0.2/32".parse().unwrap()]);
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_configure_sets_listen_port() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgconf0", FakePlatform::without_kernel()).await;

    let port = {
        let scratch = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        scratch.local_addr().unwrap().port()
    };
    iface
        .configure(|config| {
            config.listen_port = Some(port);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(iface.port().await.unwrap(), port);
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_fails_after_socket_removed() {
    let dir = TempDir::new().unwrap();
    let iface = userspace(&dir, "wgping0", FakePlatform::without_kernel()).await;
    iface.ping().await.unwrap();

    std::fs::remove_file(socket_path(dir.path(), "wgping0")).unwrap();
    let err = iface.ping().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Liveness);
    assert!(!iface.has_peer(&KeyPair::generate().public.to_base64()).await);
    iface.close().await.unwrap();
}

#[tokio::test]
async fn test_two_interfaces_exchange_packets() {
    let dir = TempDir::new().unwrap();
    let platform = FakePlatform::without_kernel();
    let alice = userspace(&dir, "wgalice", platform.clone()).await;
    let bob = userspace(&dir, "wgbob", platform.clone()).await;

    let alice_key = KeyPair::generate();
    let bob_key = KeyPair::generate();
    alice
        .load_config(InterfaceConfig::new(&alice_key.private))
        .await
        .unwrap();
    bob.load_config(InterfaceConfig::new(&bob_key.private))
        .await
        .unwrap();

    let bob_port = bob.port().await.unwrap();
    alice
        .configure(|config| {
            let mut peer = wg_embed::wireguard::PeerConfig::new(bob_key.public);
            peer.endpoint = Some(format!("127.0.0.1:{}", bob_port).parse().unwrap());
            peer.replace_allowed_ips = true;
            peer.allowed_ips = vec!["10.9.0.2/32".parse().unwrap()];
            config.peers.push(peer);
            Ok(())
        })
        .await
        .unwrap();
    bob.add_peer(&alice_key.public.to_base64(), None, &["10.9.0.1/32"])
        .await
        .unwrap();

    let packet = ipv4_packet([10, 9, 0, 1], [10, 9, 0, 2], b"hello");
    let alice_tun = platform.tun("wgalice");
    let bob_tun = platform.tun("wgbob");

    let mut delivered = false;
    for _ in 0..10 {
        alice_tun.push(packet.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        if bob_tun.written().contains(&packet) {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "packet never reached the other interface");

    let peer = bob.peer(&alice_key.public.to_base64()).await.unwrap();
    assert!(peer.last_handshake.is_some());
    assert!(peer.rx_bytes > 0);
    assert_eq!(peer.endpoint.map(|e| e.ip().to_string()), Some("127.0.0.1".to_string()));

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}

#[tokio::test]
async fn test_reloading_same_config_keeps_sessions() {
    let dir = TempDir::new().unwrap();
    let platform = FakePlatform::without_kernel();
    let alice = userspace(&dir, "wgkeep0", platform.clone()).await;
    let bob = userspace(&dir, "wgkeep1", platform.clone()).await;

    let alice_key = KeyPair::generate();
    let bob_key = KeyPair::generate();
    let bob_config = InterfaceConfig::new(&bob_key.private);
    alice
        .load_config(InterfaceConfig::new(&alice_key.private))
        .await
        .unwrap();
    bob.load_config(bob_config.clone()).await.unwrap();

    let bob_port = bob.port().await.unwrap();
    alice
        .configure(|config| {
            let mut peer = wg_embed::wireguard::PeerConfig::new(bob_key.public);
            peer.endpoint = Some(format!("127.0.0.1:{}", bob_port).parse().unwrap());
            peer.replace_allowed_ips = true;
            peer.allowed_ips = vec!["10.9.1.2/32".parse().unwrap()];
            config.peers.push(peer);
            Ok(())
        })
        .await
        .unwrap();
    bob.add_peer(&alice_key.public.to_base64(), None, &["10.9.1.1/32"])
        .await
        .unwrap();

    let packet = ipv4_packet([10, 9, 1, 1], [10, 9, 1, 2], b"hello");
    let alice_tun = platform.tun("wgkeep0");
    let bob_tun = platform.tun("wgkeep1");
    for _ in 0..10 {
        alice_tun.push(packet.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        if bob_tun.written().contains(&packet) {
            break;
        }
    }

    let alice_pub = alice_key.public.to_base64();
    let before = bob.peer(&alice_pub).await.unwrap().last_handshake;
    assert!(before.is_some());

    bob.load_config(bob_config).await.unwrap();

    let after = bob.peer(&alice_pub).await.unwrap().last_handshake;
    assert!(after.is_some(), "reload dropped the session");

    alice.close().await.unwrap();
    bob.close().await.unwrap();
}
