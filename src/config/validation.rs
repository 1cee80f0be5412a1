//! Configuration validation functions
//!
//! This module provides parsing and validation for interface names, CIDR
//! ranges, endpoints and MTU values.

use crate::error::{Result, WgEmbedError};
use ipnet::IpNet;
use std::net::{SocketAddr, ToSocketAddrs};

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WgEmbedError::Validation(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(WgEmbedError::Validation(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(WgEmbedError::Validation(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', '-' and '.' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate MTU value (IPv6 minimum up to the 16-bit maximum)
pub fn validate_mtu(mtu: u32) -> Result<()> {
    if !(1280..=65535).contains(&mtu) {
        return Err(WgEmbedError::Validation(format!(
            "MTU value {} is out of valid range (1280-65535)",
            mtu
        )));
    }
    Ok(())
}

/// Parse an allowed-IP range, truncating host bits to the network
///
/// `10.0.0.5/24` yields `10.0.0.0/24`. A bare address without a prefix is
/// rejected.
pub fn parse_allowed_ip(cidr: &str) -> Result<IpNet> {
    parse_cidr(cidr).map(|net| net.trunc())
}

/// Parse an interface address, keeping the host part
pub fn parse_interface_address(cidr: &str) -> Result<IpNet> {
    parse_cidr(cidr)
}

fn parse_cidr(cidr: &str) -> Result<IpNet> {
    let trimmed = cidr.trim();
    if !trimmed.contains('/') {
        return Err(WgEmbedError::Validation(format!(
            "Invalid CIDR notation: {} (expected format: IP/prefix)",
            cidr
        )));
    }
    trimmed
        .parse::<IpNet>()
        .map_err(|e| WgEmbedError::Validation(format!("Invalid CIDR notation '{}': {}", cidr, e)))
}

/// Parse an endpoint (`ip:port`, `[ipv6]:port` or `host:port`)
///
/// Host names are resolved once, at parse time; the first address wins.
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let endpoint = endpoint.trim();
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(WgEmbedError::Validation(
                "Port number cannot be 0".to_string(),
            ));
        }
        return Ok(addr);
    }

    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        WgEmbedError::Validation(format!(
            "Invalid endpoint format: {} (expected format: host:port)",
            endpoint
        ))
    })?;

    if host.is_empty() {
        return Err(WgEmbedError::Validation(
            "Host cannot be empty in endpoint".to_string(),
        ));
    }

    let port: u16 = port.parse().map_err(|_| {
        WgEmbedError::Validation(format!("Invalid port in endpoint: {}", endpoint))
    })?;
    if port == 0 {
        return Err(WgEmbedError::Validation(
            "Port number cannot be 0".to_string(),
        ));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            WgEmbedError::Validation(format!("Failed to resolve endpoint '{}': {}", endpoint, e))
        })?
        .next()
        .ok_or_else(|| {
            WgEmbedError::Validation(format!("Endpoint '{}' resolved to no address", endpoint))
        })
}
