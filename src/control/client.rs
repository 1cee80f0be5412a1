//! UAPI socket client

use crate::control::uapi;
use crate::error::{Result, WgEmbedError};
use crate::wireguard::{Device, DeviceConfig};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

/// Client for one device's UAPI socket
///
/// Each request opens a fresh connection.
#[derive(Debug, Clone)]
pub struct UapiClient {
    path: PathBuf,
}

impl UapiClient {
    /// Create a client for the socket at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch the device state
    pub async fn get(&self, name: &str) -> Result<Device> {
        let response = self.round_trip(uapi::GET_REQUEST).await?;
        uapi::decode_device(name, &response)
    }

    /// Apply a configuration update
    pub async fn set(&self, config: &DeviceConfig) -> Result<()> {
        let response = self.round_trip(&uapi::encode_set(config)).await?;
        uapi::check_errno(&response)
    }

    /// Send one request and read the response up to its terminating empty line
    async fn round_trip(&self, request: &str) -> Result<String> {
        debug!("UAPI request to {:?}", self.path);

        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            WgEmbedError::Resource(format!("Failed to connect to {:?}: {}", self.path, e))
        })?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(request.as_bytes()).await.map_err(|e| {
            WgEmbedError::Resource(format!("Failed to send UAPI request: {}", e))
        })?;

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await.map_err(|e| {
                WgEmbedError::Resource(format!("Failed to read UAPI response: {}", e))
            })?;
            if n == 0 {
                return Err(WgEmbedError::ControlPlane(
                    "UAPI connection closed before end of response".to_string(),
                ));
            }
            if line == "\n" {
                break;
            }
            response.push_str(&line);
        }

        Ok(response)
    }
}
