//! UAPI socket server
//!
//! Listens on `<socket_dir>/<name>.sock` and serves UAPI requests for one
//! device. Every accepted connection is handled on its own task; the accept
//! loop stops the first time accept fails or the server is closed, and
//! reports why on a channel.

use crate::control::{socket_path, uapi};
use crate::error::{ErrorKind, Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig};
use async_trait::async_trait;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Device-side handler for UAPI requests
#[async_trait]
pub trait UapiHandler: Send + Sync + 'static {
    /// Current device state
    async fn get(&self) -> Result<Device>;

    /// Apply an update
    async fn set(&self, config: DeviceConfig) -> Result<()>;
}

/// Bound UAPI socket, not yet accepting
pub struct UapiListener {
    path: PathBuf,
    listener: UnixListener,
}

impl UapiListener {
    /// Bind the socket for `name`, replacing a stale socket file
    pub fn bind(socket_dir: &Path, name: &str) -> Result<Self> {
        let path = socket_path(socket_dir, name);
        info!("Starting UAPI listener at {:?}", path);

        std::fs::create_dir_all(socket_dir).map_err(|e| {
            WgEmbedError::Resource(format!("Failed to create socket directory: {}", e))
        })?;

        if path.exists() {
            info!("Removing existing socket at {:?}", path);
            std::fs::remove_file(&path).map_err(|e| {
                WgEmbedError::Resource(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            WgEmbedError::Resource(format!("Failed to bind Unix socket {:?}: {}", path, e))
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
            WgEmbedError::Resource(format!("Failed to restrict socket permissions: {}", e))
        })?;

        Ok(Self { path, listener })
    }

    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start accepting connections, serving each with `handler`
    pub fn spawn<H: UapiHandler>(self, handler: Arc<H>) -> UapiServer {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (error_tx, error_rx) = mpsc::channel(1);
        let path = self.path.clone();

        let task = tokio::spawn(accept_loop(self.listener, handler, shutdown_rx, error_tx));

        UapiServer {
            path,
            shutdown: shutdown_tx,
            task,
            errors: Mutex::new(error_rx),
        }
    }
}

async fn accept_loop<H: UapiHandler>(
    listener: UnixListener,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
    errors: mpsc::Sender<io::Error>,
) {
    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break io::Error::new(io::ErrorKind::NotConnected, "uapi listener closed");
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                debug!("UAPI connection ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept UAPI connection: {}", e);
                        break e;
                    }
                }
            }
        }
    };

    let _ = errors.send(reason).await;
}

/// Running UAPI accept loop
pub struct UapiServer {
    path: PathBuf,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    errors: Mutex<mpsc::Receiver<io::Error>>,
}

impl UapiServer {
    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the accept loop stops and return why
    pub async fn wait(&self) -> WgEmbedError {
        match self.errors.lock().await.recv().await {
            Some(e) => WgEmbedError::Resource(format!("UAPI listener stopped: {}", e)),
            None => WgEmbedError::Resource("UAPI listener stopped".to_string()),
        }
    }

    /// Stop accepting and remove the socket file
    pub async fn close(self) -> Result<()> {
        info!("Shutting down UAPI listener at {:?}", self.path);
        let _ = self.shutdown.send(true);

        if let Err(e) = self.task.await {
            error!("UAPI accept loop panicked: {}", e);
        }

        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                WgEmbedError::Resource(format!("Failed to remove socket: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Serve requests on one connection until the peer hangs up
pub async fn handle_connection<H: UapiHandler + ?Sized>(
    stream: UnixStream,
    handler: Arc<H>,
) -> io::Result<()> {
    debug!("New UAPI connection");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut header = String::new();

    loop {
        header.clear();
        if reader.read_line(&mut header).await? == 0 {
            debug!("UAPI client disconnected");
            return Ok(());
        }
        if header.trim().is_empty() {
            continue;
        }

        let mut body = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                break;
            }
            body.push(trimmed.to_string());
        }

        let response = match uapi::Operation::from_header(&header) {
            Ok(uapi::Operation::Get) => match handler.get().await {
                Ok(device) => uapi::encode_device(&device) + &uapi::errno_line(0),
                Err(e) => {
                    error!("UAPI get failed: {}", e);
                    uapi::errno_line(errno_for(&e))
                }
            },
            Ok(uapi::Operation::Set) => {
                let result = match uapi::decode_set(body.iter().map(String::as_str)) {
                    Ok(config) => handler.set(config).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => uapi::errno_line(0),
                    Err(e) => {
                        error!("UAPI set failed: {}", e);
                        uapi::errno_line(errno_for(&e))
                    }
                }
            }
            Err(e) => {
                error!("Invalid UAPI request: {}", e);
                uapi::errno_line(libc::EINVAL)
            }
        };

        writer.write_all(response.as_bytes()).await?;
    }
}

fn errno_for(err: &WgEmbedError) -> i32 {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::ControlPlane => libc::EINVAL,
        ErrorKind::NotFound => libc::ENOENT,
        _ => libc::EIO,
    }
}
