//! WireGuard interface lifecycle
//!
//! An [`Interface`] is one WireGuard device plus everything needed to run it:
//! a control-plane client, the OS platform, and the backend resources (a
//! kernel link, or a userspace engine with its UAPI socket).
//!
//! Interfaces are created by [`create`], [`new_with_options`] or
//! [`with_platform`]. When kernel devices are allowed and creating one fails,
//! creation falls back to the userspace engine.

mod activation;
mod kernel;
mod management;
mod userspace;

use crate::config::{validate_interface_name, InterfaceConfig};
use crate::control::{ControlPlane, DEFAULT_SOCKET_DIR};
use crate::error::{Result, WgEmbedError};
use crate::platform::{get_platform, Platform};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Options for creating an interface
#[derive(Debug, Clone)]
pub struct Options {
    /// Interface name
    pub interface_name: String,
    /// Try a kernel device before the userspace engine
    pub allow_kernel_module: bool,
    /// Directory holding UAPI sockets
    pub socket_dir: PathBuf,
}

impl Options {
    /// Options for a userspace interface named `name`
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            allow_kernel_module: false,
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }

    /// Allow or forbid the kernel backend
    pub fn allow_kernel_module(mut self, allow: bool) -> Self {
        self.allow_kernel_module = allow;
        self
    }

    /// Use a different socket directory
    pub fn socket_dir(mut self, socket_dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = socket_dir.into();
        self
    }
}

/// Which implementation runs an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The kernel WireGuard module
    Kernel,
    /// The in-process userspace engine
    Userspace,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Kernel => write!(f, "kernel"),
            BackendKind::Userspace => write!(f, "userspace"),
        }
    }
}

/// Backend resources owned by an interface
#[async_trait]
pub(crate) trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Resolve when the backend stops on its own
    async fn wait(&self) -> Result<()>;

    /// Release backend resources; the control-plane client is closed by the caller
    async fn shutdown(self: Box<Self>, name: &str, platform: &dyn Platform) -> Result<()>;
}

/// A running WireGuard interface
pub struct Interface {
    name: String,
    client: Box<dyn ControlPlane>,
    platform: Arc<dyn Platform>,
    backend: Box<dyn Backend>,
    config: RwLock<Option<InterfaceConfig>>,
    apply_lock: Mutex<()>,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

/// Create a userspace interface named `name`
pub async fn create(name: &str) -> Result<Interface> {
    new_with_options(Options::new(name)).await
}

/// Create an interface on the current OS platform
pub async fn new_with_options(options: Options) -> Result<Interface> {
    with_platform(options, get_platform()).await
}

/// Create an interface on the given platform
pub async fn with_platform(options: Options, platform: Arc<dyn Platform>) -> Result<Interface> {
    validate_interface_name(&options.interface_name)?;

    if options.allow_kernel_module && platform.supports_kernel_module() {
        match kernel::new_kernel_interface(&options, platform.clone()).await {
            Ok(iface) => return Ok(iface),
            Err(e) => {
                info!("falling back to userspace implementation: {}", e);
                info!("host platform: {}", platform.info());
            }
        }
    }

    userspace::new_userspace_interface(&options, platform).await
}

impl Interface {
    pub(crate) fn from_parts(
        name: String,
        client: Box<dyn ControlPlane>,
        platform: Arc<dyn Platform>,
        backend: Box<dyn Backend>,
    ) -> Self {
        Self {
            name,
            client,
            platform,
            backend,
            config: RwLock::new(None),
            apply_lock: Mutex::new(()),
        }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend running this interface
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Resolve when the interface stops serving on its own
    ///
    /// Userspace interfaces resolve with an error once the UAPI accept loop
    /// ends. Kernel interfaces resolve immediately.
    pub async fn wait(&self) -> Result<()> {
        self.backend.wait().await
    }

    /// Tear down the interface
    ///
    /// Every step is attempted; the first error is returned.
    pub async fn close(self) -> Result<()> {
        info!("Closing {} WireGuard interface {}", self.backend.kind(), self.name);

        let Interface {
            name,
            client,
            platform,
            backend,
            ..
        } = self;

        let mut result = backend.shutdown(&name, platform.as_ref()).await;

        if let Err(e) = client.close().await {
            if result.is_ok() {
                result = Err(e);
            } else {
                warn!("Failed to close control client for {}: {}", name, e);
            }
        }

        result
    }
}

/// Keep the first error of a teardown sequence, logging the rest
pub(crate) fn keep_first(first: &mut Option<WgEmbedError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("{} failed: {}", step, e);
        if first.is_none() {
            *first = Some(e);
        }
    }
}
