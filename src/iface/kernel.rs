//! Kernel device adapter

use super::{keep_first, Backend, BackendKind, Interface, Options};
use crate::control::ControlClient;
use crate::error::{Result, ResultExt, WgEmbedError};
use crate::platform::Platform;
use crate::wireguard::DEFAULT_MTU;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// A link created through the kernel WireGuard module
pub(crate) struct KernelBackend;

/// Create a kernel WireGuard link and wrap it in an interface
///
/// A failed attempt leaves no link behind.
pub(crate) async fn new_kernel_interface(
    options: &Options,
    platform: Arc<dyn Platform>,
) -> Result<Interface> {
    let name = &options.interface_name;

    platform
        .create_wireguard_link(name, DEFAULT_MTU)
        .map_err(|e| {
            WgEmbedError::BackendUnavailable(format!(
                "failed to create wireguard kernel device: {}",
                e
            ))
        })?;

    let client = match ControlClient::open(&options.socket_dir) {
        Ok(client) => client,
        Err(e) => {
            if let Err(del) = platform.delete_link(name) {
                warn!("Failed to delete link {} after client error: {}", name, del);
            }
            return Err(e).context("failed to create wg client");
        }
    };

    info!("Created kernel WireGuard interface {}", name);

    Ok(Interface::from_parts(
        name.clone(),
        Box::new(client),
        platform,
        Box::new(KernelBackend),
    ))
}

#[async_trait]
impl Backend for KernelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kernel
    }

    async fn wait(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(self: Box<Self>, name: &str, platform: &dyn Platform) -> Result<()> {
        platform.find_link(name)?;

        let mut first = None;
        keep_first(&mut first, "interface down", platform.interface_down(name));
        keep_first(&mut first, "link delete", platform.delete_link(name));

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
