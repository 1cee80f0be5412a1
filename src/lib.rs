//! wg-embed: embeddable WireGuard interface manager
//!
//! This library creates and runs WireGuard interfaces from inside an
//! application. An interface is backed either by the kernel module or by an
//! in-process userspace engine built on boringtun; both are driven through
//! the same control plane, so configuration and peer management behave the
//! same whichever backend is in use.
//!
//! # Architecture
//!
//! Creating an interface picks a backend: when kernel devices are allowed
//! the kernel is tried first, and the userspace engine is the fallback.
//! The resulting [`Interface`] loads configs, assigns addresses, brings the
//! link up and adds or removes peers.
//!
//! # Modules
//!
//! - `config`: Configuration files and validation
//! - `control`: Control plane (UAPI socket protocol and `wg(8)`)
//! - `engine`: Userspace WireGuard engine
//! - `http`: HTTP control API used by the daemon
//! - `iface`: Interface lifecycle and peer management
//! - `platform`: Platform-specific link and TUN operations (Linux, macOS)
//! - `wireguard`: Keys and declarative device types
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("wg-embed supports Linux and macOS only");

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod http;
pub mod iface;
pub mod platform;
pub mod wireguard;

// Re-export commonly used types
pub use error::{Result, WgEmbedError};
pub use iface::{create, new_with_options, with_platform, BackendKind, Interface, Options};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
