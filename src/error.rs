//! Error types for wg-embed
//!
//! This module defines the error types used throughout the library.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.
//!
//! Every failure carries one of a small set of kinds (see [`ErrorKind`]).
//! Stages wrap errors with [`ResultExt::context`], which keeps the kind of
//! the underlying error so callers can still branch on it.

use thiserror::Error;

/// Main error type for wg-embed operations
#[derive(Error, Debug)]
pub enum WgEmbedError {
    /// Malformed caller input: keys, CIDRs, config files
    #[error("Validation error: {0}")]
    Validation(String),

    /// Kernel device could not be created
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// OS-level device, link, socket or process failure
    #[error("Resource error: {0}")]
    Resource(String),

    /// Peer or link lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Liveness check failed; the cause is intentionally dropped
    #[error("failed to ping wireguard")]
    Liveness,

    /// Control-plane protocol failure (malformed reply, non-zero errno)
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with the stage that produced it
    #[error("{context}: {source}")]
    Context {
        /// Stage or operation name
        context: String,
        /// Underlying error
        #[source]
        source: Box<WgEmbedError>,
    },
}

/// Result type alias using WgEmbedError
pub type Result<T> = std::result::Result<T, WgEmbedError>;

/// Coarse classification of a [`WgEmbedError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`WgEmbedError::Validation`]
    Validation,
    /// See [`WgEmbedError::BackendUnavailable`]
    BackendUnavailable,
    /// See [`WgEmbedError::Resource`]; I/O errors land here too
    Resource,
    /// See [`WgEmbedError::NotFound`]
    NotFound,
    /// See [`WgEmbedError::Liveness`]
    Liveness,
    /// See [`WgEmbedError::ControlPlane`]
    ControlPlane,
}

impl WgEmbedError {
    /// Wrap this error with the name of the failing stage
    pub fn context(self, context: impl Into<String>) -> Self {
        WgEmbedError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Kind of the innermost error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WgEmbedError::Validation(_) => ErrorKind::Validation,
            WgEmbedError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            WgEmbedError::Resource(_) | WgEmbedError::Io(_) => ErrorKind::Resource,
            WgEmbedError::NotFound(_) => ErrorKind::NotFound,
            WgEmbedError::Liveness => ErrorKind::Liveness,
            WgEmbedError::ControlPlane(_) => ErrorKind::ControlPlane,
            WgEmbedError::Context { source, .. } => source.kind(),
        }
    }

    /// Check whether this error signals absence rather than failure
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Extension trait for attaching stage context to results
pub trait ResultExt<T> {
    /// Wrap the error, if any, with the given stage name
    fn context(self, context: &str) -> Result<T>;
}

impl<T, E: Into<WgEmbedError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}
