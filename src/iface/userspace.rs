//! Userspace device adapter
//!
//! Runs the in-process engine on a TUN device and serves its UAPI socket so
//! the control client can reach it like any other userspace WireGuard.

use super::{keep_first, Backend, BackendKind, Interface, Options};
use crate::control::{ControlClient, UapiListener, UapiServer};
use crate::engine::{Engine, EngineLogger, LogLevel};
use crate::error::{Result, ResultExt};
use crate::platform::Platform;
use crate::wireguard::DEFAULT_MTU;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Engine and UAPI endpoint owned by a userspace interface
pub(crate) struct UserspaceBackend {
    server: UapiServer,
    engine: Arc<Engine>,
}

/// Start a userspace engine and wrap it in an interface
pub(crate) async fn new_userspace_interface(
    options: &Options,
    platform: Arc<dyn Platform>,
) -> Result<Interface> {
    let name = options.interface_name.clone();

    let client = ControlClient::open(&options.socket_dir).context("failed to create wg client")?;

    let tun = platform
        .create_tun_device(&name, DEFAULT_MTU)
        .context("failed to create TUN device")?;

    let listener =
        UapiListener::bind(&options.socket_dir, &name).context("UAPI listen error")?;

    let logger = EngineLogger::new(LogLevel::Error, format!("({}) ", name));
    let engine = match Engine::new(name.clone(), tun, logger).await {
        Ok(engine) => engine,
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(listener.path()) {
                warn!("Failed to remove UAPI socket {:?}: {}", listener.path(), rm);
            }
            return Err(e);
        }
    };

    let server = listener.spawn(engine.clone());
    info!(
        "Created userspace WireGuard interface {} (UAPI at {:?})",
        name,
        server.path()
    );

    Ok(Interface::from_parts(
        name,
        Box::new(client),
        platform,
        Box::new(UserspaceBackend { server, engine }),
    ))
}

#[async_trait]
impl Backend for UserspaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Userspace
    }

    async fn wait(&self) -> Result<()> {
        Err(self.server.wait().await)
    }

    async fn shutdown(self: Box<Self>, _name: &str, _platform: &dyn Platform) -> Result<()> {
        let UserspaceBackend { server, engine } = *self;

        let mut first = None;
        keep_first(&mut first, "UAPI close", server.close().await);
        keep_first(&mut first, "engine close", engine.close().await);

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
