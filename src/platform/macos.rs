//! macOS platform implementation
//!
//! macOS has no kernel WireGuard. Userspace devices are `utun` interfaces,
//! and the OS assigns their addresses and link state on its own, so
//! activation is implicit.

use crate::engine::TunDevice;
use crate::error::{Result, WgEmbedError};
use crate::platform::{create_tun, detection, run_command, Activation, Platform, PlatformInfo};
use ipnet::IpNet;
use tracing::{debug, info};

/// macOS platform implementation
pub struct MacOsPlatform {
    info: PlatformInfo,
}

impl MacOsPlatform {
    /// Create a new macOS platform instance
    pub fn new() -> Self {
        Self {
            info: detection::detect_environment(),
        }
    }
}

impl Default for MacOsPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for MacOsPlatform {
    fn info(&self) -> PlatformInfo {
        self.info.clone()
    }

    fn supports_kernel_module(&self) -> bool {
        false
    }

    fn activation(&self) -> Activation {
        Activation::Implicit
    }

    fn create_wireguard_link(&self, name: &str, _mtu: u32) -> Result<()> {
        Err(WgEmbedError::BackendUnavailable(format!(
            "kernel WireGuard is not available on macOS ({})",
            name
        )))
    }

    fn find_link(&self, name: &str) -> Result<()> {
        run_command("ifconfig", &[name])
            .map(|_| ())
            .map_err(|e| WgEmbedError::NotFound(format!("link {}: {}", name, e)))
    }

    fn interface_up(&self, name: &str) -> Result<()> {
        info!("Bringing interface {} up", name);
        run_command("ifconfig", &[name, "up"])?;
        Ok(())
    }

    fn interface_down(&self, name: &str) -> Result<()> {
        info!("Bringing interface {} down", name);
        run_command("ifconfig", &[name, "down"])?;
        Ok(())
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        // utun devices disappear when their file descriptor is closed
        debug!("Nothing to delete for {}", name);
        Ok(())
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> Result<()> {
        debug!("Setting MTU for interface {}: {}", name, mtu);
        run_command("ifconfig", &[name, "mtu", &mtu.to_string()])?;
        Ok(())
    }

    fn add_address(&self, name: &str, address: &IpNet) -> Result<()> {
        info!("Adding address {} to interface {}", address, name);
        let addr = address.addr().to_string();
        match address {
            IpNet::V4(_) => run_command("ifconfig", &[name, "inet", &addr, &addr, "alias"])?,
            IpNet::V6(v6) => run_command(
                "ifconfig",
                &[name, "inet6", &addr, "prefixlen", &v6.prefix_len().to_string(), "alias"],
            )?,
        };
        Ok(())
    }

    fn create_tun_device(&self, name: &str, mtu: u32) -> Result<Box<dyn TunDevice>> {
        info!("Creating utun device for '{}' with MTU {}", name, mtu);
        // The kernel picks the utun unit number
        let device = create_tun(None, mtu)?;
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macos_platform_is_implicit() {
        let platform = MacOsPlatform::new();
        assert_eq!(platform.activation(), Activation::Implicit);
        assert!(!platform.supports_kernel_module());
        assert!(platform.create_wireguard_link("wg0", 1420).is_err());
    }
}
