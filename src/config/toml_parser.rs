//! TOML configuration file parser
//!
//! Reads and writes [`InterfaceConfig`] files.

use crate::config::InterfaceConfig;
use crate::error::{Result, WgEmbedError};
use std::fs;
use std::path::Path;
use tracing::debug;

impl InterfaceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading interface config from {:?}", path);

        let contents = fs::read_to_string(path).map_err(|e| {
            WgEmbedError::Validation(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| WgEmbedError::Validation(format!("Failed to parse TOML config: {}", e)))
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| WgEmbedError::Validation(format!("Failed to render TOML config: {}", e)))
    }
}
