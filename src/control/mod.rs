//! WireGuard control plane
//!
//! This module configures and inspects devices regardless of which backend
//! runs them. Userspace devices are reached over their UAPI socket in the
//! socket directory; kernel devices (Linux only) through `wg(8)`.

mod client;
#[cfg(target_os = "linux")]
mod kernel;
mod server;
pub mod uapi;

pub use client::UapiClient;
#[cfg(target_os = "linux")]
pub use kernel::WgTool;
pub use server::{handle_connection, UapiHandler, UapiListener, UapiServer};

use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Default directory holding UAPI sockets
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/wireguard";

/// Operations a control plane offers for named devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Apply a declarative update to a device atomically
    async fn apply(&self, device: &str, config: &DeviceConfig) -> Result<()>;

    /// Fetch a fresh snapshot of a device
    async fn device(&self, name: &str) -> Result<Device>;

    /// Release the client; later calls fail
    async fn close(&self) -> Result<()>;
}

/// Path of the UAPI socket for a device
pub fn socket_path(socket_dir: &Path, name: &str) -> PathBuf {
    socket_dir.join(format!("{}.sock", name))
}

/// Control plane client routing each device to its backend
pub struct ControlClient {
    socket_dir: PathBuf,
    closed: AtomicBool,
}

enum Route {
    Uapi(UapiClient),
    #[cfg(target_os = "linux")]
    Kernel(WgTool),
}

impl ControlClient {
    /// Open a client, creating the socket directory if needed
    pub fn open(socket_dir: impl AsRef<Path>) -> Result<Self> {
        let socket_dir = socket_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&socket_dir).map_err(|e| {
            WgEmbedError::Resource(format!(
                "Failed to create socket directory {:?}: {}",
                socket_dir, e
            ))
        })?;

        debug!("Control client using socket directory {:?}", socket_dir);
        Ok(Self {
            socket_dir,
            closed: AtomicBool::new(false),
        })
    }

    /// Directory searched for UAPI sockets
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    fn route(&self, name: &str) -> Result<Route> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WgEmbedError::Resource(
                "control client is closed".to_string(),
            ));
        }

        let path = socket_path(&self.socket_dir, name);
        if path.exists() {
            return Ok(Route::Uapi(UapiClient::new(path)));
        }

        #[cfg(target_os = "linux")]
        {
            Ok(Route::Kernel(WgTool::new()))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(WgEmbedError::NotFound(format!(
                "no wireguard device named {}",
                name
            )))
        }
    }
}

#[async_trait]
impl ControlPlane for ControlClient {
    async fn apply(&self, device: &str, config: &DeviceConfig) -> Result<()> {
        match self.route(device)? {
            Route::Uapi(client) => client.set(config).await,
            #[cfg(target_os = "linux")]
            Route::Kernel(wg) => wg.set(device, config).await,
        }
    }

    async fn device(&self, name: &str) -> Result<Device> {
        match self.route(name)? {
            Route::Uapi(client) => client.get(name).await,
            #[cfg(target_os = "linux")]
            Route::Kernel(wg) => wg.show(name).await,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(WgEmbedError::Resource(
                "control client already closed".to_string(),
            ));
        }
        debug!("Control client closed");
        Ok(())
    }
}
