//! Performance benchmarks for wg-embed
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr};
use wg_embed::config::InterfaceConfig;
use wg_embed::control::uapi;
use wg_embed::engine::{destination, AllowedIps};
use wg_embed::wireguard::{DeviceConfig, KeyPair, PeerConfig, PrivateKey};

fn bench_public_key_derivation(c: &mut Criterion) {
    let private_key = PrivateKey::generate();

    c.bench_function("public_key_derivation", |b| {
        b.iter(|| {
            let _public = black_box(&private_key).public_key();
        });
    });
}

fn bench_config_parsing(c: &mut Criterion) {
    let local = KeyPair::generate();
    let toml_data = format!(
        r#"
[Interface]
PrivateKey = "{}"
Address = ["10.44.0.1/24"]
ListenPort = 51820

[[Peer]]
PublicKey = "{}"
AllowedIPs = ["10.44.0.2/32"]
Endpoint = "192.168.1.1:51820"

[[Peer]]
PublicKey = "{}"
AllowedIPs = ["10.44.1.0/24"]
PersistentKeepalive = 25
"#,
        local.private.to_base64(),
        KeyPair::generate().public.to_base64(),
        KeyPair::generate().public.to_base64(),
    );

    c.bench_function("config_parsing_toml", |b| {
        b.iter(|| {
            let config = InterfaceConfig::parse(black_box(&toml_data)).unwrap();
            let _device = config.to_device_config().unwrap();
        });
    });
}

fn bench_allowed_ips_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("allowed_ips_lookup");

    for peers in [8u32, 64, 256] {
        let mut table = AllowedIps::new();
        for i in 0..peers {
            let net = IpNet::new(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 | (i << 8))), 24).unwrap();
            table.insert(net, i);
        }
        let target = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 | ((peers / 2) << 8) | 7));

        group.bench_with_input(BenchmarkId::from_parameter(peers), &target, |b, addr| {
            b.iter(|| table.lookup(black_box(*addr)));
        });
    }

    group.finish();
}

fn bench_packet_destination(c: &mut Criterion) {
    let mut packet = vec![0u8; 1420];
    packet[0] = 0x45;
    packet[16..20].copy_from_slice(&[10, 44, 0, 2]);

    c.bench_function("packet_destination", |b| {
        b.iter(|| destination(black_box(&packet)));
    });
}

fn bench_uapi(c: &mut Criterion) {
    let mut group = c.benchmark_group("uapi");

    let mut config = DeviceConfig {
        private_key: Some(PrivateKey::generate()),
        listen_port: Some(51820),
        ..DeviceConfig::default()
    };
    for i in 0..32u32 {
        let mut peer = PeerConfig::new(KeyPair::generate().public);
        peer.replace_allowed_ips = true;
        peer.allowed_ips = vec![IpNet::new(IpAddr::V4(Ipv4Addr::from(0x0a00_0000 | i)), 32).unwrap()];
        config.peers.push(peer);
    }

    group.bench_function("encode_set", |b| {
        b.iter(|| uapi::encode_set(black_box(&config)));
    });

    let encoded = uapi::encode_set(&config);
    group.bench_function("decode_set", |b| {
        b.iter(|| {
            uapi::decode_set(black_box(&encoded).lines().skip(1).filter(|l| !l.is_empty()))
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_public_key_derivation,
    bench_config_parsing,
    bench_allowed_ips_lookup,
    bench_packet_destination,
    bench_uapi
);
criterion_main!(benches);
