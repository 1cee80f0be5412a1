//! Linux platform implementation
//!
//! Links are managed with `ip(8)`. Kernel WireGuard links are plain
//! `type wireguard` links; userspace devices are TUN devices from the `tun`
//! crate.

use crate::engine::TunDevice;
use crate::error::{Result, WgEmbedError};
use crate::platform::{create_tun, detection, run_command, Activation, Platform, PlatformInfo};
use ipnet::IpNet;
use tracing::{debug, info};

/// Linux platform implementation
pub struct LinuxPlatform {
    info: PlatformInfo,
}

impl LinuxPlatform {
    /// Create a new Linux platform instance
    pub fn new() -> Self {
        Self {
            info: detection::detect_environment(),
        }
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for LinuxPlatform {
    fn info(&self) -> PlatformInfo {
        self.info.clone()
    }

    fn supports_kernel_module(&self) -> bool {
        true
    }

    fn activation(&self) -> Activation {
        Activation::Explicit
    }

    fn create_wireguard_link(&self, name: &str, mtu: u32) -> Result<()> {
        info!("Creating wireguard link {} with MTU {}", name, mtu);
        run_command(
            "ip",
            &["link", "add", "dev", name, "mtu", &mtu.to_string(), "type", "wireguard"],
        )?;
        Ok(())
    }

    fn find_link(&self, name: &str) -> Result<()> {
        run_command("ip", &["link", "show", "dev", name])
            .map(|_| ())
            .map_err(|e| WgEmbedError::NotFound(format!("link {}: {}", name, e)))
    }

    fn interface_up(&self, name: &str) -> Result<()> {
        info!("Bringing interface {} up", name);
        run_command("ip", &["link", "set", "dev", name, "up"])?;
        Ok(())
    }

    fn interface_down(&self, name: &str) -> Result<()> {
        info!("Bringing interface {} down", name);
        run_command("ip", &["link", "set", "dev", name, "down"])?;
        Ok(())
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        info!("Deleting link {}", name);
        run_command("ip", &["link", "delete", "dev", name])?;
        Ok(())
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        debug!("Setting MTU for interface {}: {}", name, mtu);
        run_command("ip", &["link", "set", "dev", name, "mtu", &mtu.to_string()])?;
        Ok(())
    }

    fn add_address(&self, name: &str, address: &IpNet) -> Result<()> {
        info!("Adding address {} to interface {}", address, name);
        match run_command("ip", &["address", "add", &address.to_string(), "dev", name]) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("File exists") => {
                debug!("Address {} already present on {}", address, name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn create_tun_device(&self, name: &str, mtu: u32) -> Result<Box<dyn TunDevice>> {
        info!("Creating TUN device '{}' with MTU {}", name, mtu);
        let device = create_tun(Some(name), mtu)?;
        Ok(Box::new(device))
    }
}
