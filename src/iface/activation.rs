//! Bringing an interface up and assigning its addresses
//!
//! On platforms with [`Activation::Implicit`] the OS handles both and these
//! functions do nothing.

use crate::config::parse_interface_address;
use crate::error::{Result, ResultExt};
use crate::platform::{Activation, Platform};
use crate::wireguard::DEFAULT_MTU;
use tracing::debug;

/// Set the link up and apply the MTU override, or the default
pub(crate) fn up(platform: &dyn Platform, name: &str, mtu: Option<u32>) -> Result<()> {
    if platform.activation() == Activation::Implicit {
        return Ok(());
    }

    platform
        .find_link(name)
        .context("failed to find wireguard interface")?;
    platform
        .interface_up(name)
        .context("failed to bring wireguard interface up")?;

    let mtu = mtu.unwrap_or(DEFAULT_MTU);
    debug!("Setting MTU of {} to {}", name, mtu);
    platform
        .set_mtu(name, mtu)
        .context("failed to set wireguard mtu")
}

/// Assign `address` (CIDR, host part kept) to the link
pub(crate) fn set_address(platform: &dyn Platform, name: &str, address: &str) -> Result<()> {
    if platform.activation() == Activation::Implicit {
        return Ok(());
    }

    platform
        .find_link(name)
        .context("failed to find wireguard interface")?;
    let address = parse_interface_address(address)
        .context("failed to parse wireguard interface ip address")?;

    debug!("Adding address {} to {}", address, name);
    platform
        .add_address(name, &address)
        .context("failed to set ip address of wireguard interface")
}
