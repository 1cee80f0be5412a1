//! Platform-specific implementations
//!
//! This module provides the OS operations the interface manager needs:
//! WireGuard link management, address and MTU configuration, and TUN device
//! creation for the userspace engine.

pub mod detection;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

use crate::engine::TunDevice;
use crate::error::{Result, WgEmbedError};
use ipnet::IpNet;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

pub use detection::{detect_environment, ContainerEnvironment, PlatformInfo};

/// How addresses and link state are applied on this platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Addresses, MTU and link state are set through OS tooling
    Explicit,
    /// The OS configures the interface on its own; activation is a no-op
    Implicit,
}

/// Platform trait for cross-platform abstractions
#[cfg_attr(test, mockall::automock)]
pub trait Platform: Send + Sync {
    /// Get platform information
    fn info(&self) -> PlatformInfo;

    /// Whether a kernel WireGuard implementation may exist here
    fn supports_kernel_module(&self) -> bool;

    /// Activation strategy for this platform
    fn activation(&self) -> Activation;

    /// Create a link of type wireguard
    fn create_wireguard_link(&self, name: &str, mtu: u32) -> Result<()>;

    /// Look up a link by name (`NotFound` when absent)
    fn find_link(&self, name: &str) -> Result<()>;

    /// Bring interface up
    fn interface_up(&self, name: &str) -> Result<()>;

    /// Bring interface down
    fn interface_down(&self, name: &str) -> Result<()>;

    /// Delete a link
    fn delete_link(&self, name: &str) -> Result<()>;

    /// Set interface MTU
    fn set_mtu(&self, name: &str, mtu: u32) -> Result<()>;

    /// Add an address to the interface; an address already present is accepted
    fn add_address(&self, name: &str, address: &IpNet) -> Result<()>;

    /// Create a non-blocking TUN device for the userspace engine
    fn create_tun_device(&self, name: &str, mtu: u32) -> Result<Box<dyn TunDevice>>;
}

/// Get the platform implementation for the current OS
pub fn get_platform() -> Arc<dyn Platform> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::LinuxPlatform::new())
    }

    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MacOsPlatform::new())
    }
}

/// Execute a system command, returning its stdout
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String> {
    debug!("Executing command: {} {:?}", program, args);

    let output = Command::new(program).args(args).output().map_err(|e| {
        WgEmbedError::Resource(format!(
            "Failed to execute {} {}: {}",
            program,
            args.join(" "),
            e
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WgEmbedError::Resource(format!(
            "Command failed: {} {}: {}",
            program,
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Create a TUN device through the `tun` crate
///
/// Without a name the OS picks one.
pub(crate) fn create_tun(name: Option<&str>, mtu: u32) -> Result<tun::platform::Device> {
    let mut config = tun::Configuration::default();
    if let Some(name) = name {
        config.name(name);
    }
    config.mtu(mtu as i32).up();

    #[cfg(target_os = "linux")]
    config.platform(|config| {
        config.packet_information(false);
    });

    let device = tun::create(&config).map_err(|e| {
        WgEmbedError::Resource(format!("Failed to create TUN device {:?}: {}", name, e))
    })?;

    device.set_nonblock().map_err(|e| {
        WgEmbedError::Resource(format!("Failed to set TUN device to non-blocking: {}", e))
    })?;

    Ok(device)
}
