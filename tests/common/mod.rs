//! Test doubles shared by the integration tests

#![allow(dead_code)]

use ipnet::IpNet;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wg_embed::engine::TunDevice;
use wg_embed::platform::{Activation, Platform, PlatformInfo};
use wg_embed::{Result, WgEmbedError};

/// In-memory TUN device
///
/// Packets pushed with [`FakeTun::push`] are read by the engine; packets the
/// engine writes are collected in [`FakeTun::written`].
#[derive(Clone, Default)]
pub struct FakeTun {
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeTun {
    pub fn push(&self, packet: Vec<u8>) {
        self.inbound.lock().unwrap().push_back(packet);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

impl Read for FakeTun {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for FakeTun {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Platform that records link operations instead of running them
#[derive(Default)]
pub struct FakePlatform {
    pub kernel_available: bool,
    calls: Mutex<Vec<String>>,
    info_requests: AtomicUsize,
    tuns: Mutex<HashMap<String, FakeTun>>,
}

impl FakePlatform {
    /// A platform with the kernel module missing
    pub fn without_kernel() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times the host description was asked for
    pub fn info_requests(&self) -> usize {
        self.info_requests.load(Ordering::SeqCst)
    }

    pub fn tun(&self, name: &str) -> FakeTun {
        self.tuns.lock().unwrap()[name].clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Platform for FakePlatform {
    fn info(&self) -> PlatformInfo {
        self.info_requests.fetch_add(1, Ordering::SeqCst);
        PlatformInfo::default()
    }

    fn supports_kernel_module(&self) -> bool {
        true
    }

    fn activation(&self) -> Activation {
        Activation::Explicit
    }

    fn create_wireguard_link(&self, name: &str, mtu: u32) -> Result<()> {
        self.record(format!("create {} {}", name, mtu));
        if self.kernel_available {
            Ok(())
        } else {
            Err(WgEmbedError::Resource(
                "RTNETLINK answers: Operation not supported".to_string(),
            ))
        }
    }

    fn find_link(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn interface_up(&self, name: &str) -> Result<()> {
        self.record(format!("up {}", name));
        Ok(())
    }

    fn interface_down(&self, name: &str) -> Result<()> {
        self.record(format!("down {}", name));
        Ok(())
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        self.record(format!("delete {}", name));
        Ok(())
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        self.record(format!("mtu {} {}", name, mtu));
        Ok(())
    }

    fn add_address(&self, name: &str, address: &IpNet) -> Result<()> {
        self.record(format!("address {} {}", name, address));
        Ok(())
    }

    fn create_tun_device(&self, name: &str, _mtu: u32) -> Result<Box<dyn TunDevice>> {
        let tun = FakeTun::default();
        self.tuns
            .lock()
            .unwrap()
            .insert(name.to_string(), tun.clone());
        Ok(Box::new(tun))
    }
}

/// Minimal IPv4 packet from `src` to `dst` carrying `payload`
pub fn ipv4_packet(src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let total = 20 + payload.len();
    let mut packet = vec![0u8; total];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    packet[8] = 64;
    packet[9] = 17;
    packet[12..16].copy_from_slice(&src);
    packet[16..20].copy_from_slice(&dst);
    packet[20..].copy_from_slice(payload);
    packet
}
