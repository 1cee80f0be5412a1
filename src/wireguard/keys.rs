//! WireGuard key management
//!
//! This module handles generation, parsing and storage of WireGuard
//! cryptographic keys. Keys are 32-byte x25519 values, carried as base64 in
//! config files and the public API, and as lowercase hex on the UAPI wire.

use crate::error::{Result, WgEmbedError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of every WireGuard key in bytes
pub const KEY_LEN: usize = 32;

fn decode_base64(s: &str, what: &str) -> Result<[u8; KEY_LEN]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| WgEmbedError::Validation(format!("Invalid base64 {}: {}", what, e)))?;
    to_key_bytes(&decoded, what)
}

fn decode_hex(s: &str, what: &str) -> Result<[u8; KEY_LEN]> {
    let decoded = hex::decode(s.trim())
        .map_err(|e| WgEmbedError::Validation(format!("Invalid hex {}: {}", what, e)))?;
    to_key_bytes(&decoded, what)
}

fn to_key_bytes(decoded: &[u8], what: &str) -> Result<[u8; KEY_LEN]> {
    if decoded.len() != KEY_LEN {
        return Err(WgEmbedError::Validation(format!(
            "Invalid {} length: expected {} bytes, got {}",
            what,
            KEY_LEN,
            decoded.len()
        )));
    }
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(decoded);
    Ok(bytes)
}

/// WireGuard private key (32 bytes, x25519)
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; KEY_LEN]>,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self {
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }

    /// Create a private key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            secret: Zeroizing::new(bytes),
        }
    }

    /// Parse a private key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        decode_base64(s, "private key").map(Self::from_bytes)
    }

    /// Parse a private key from its UAPI hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex(s, "private key").map(Self::from_bytes)
    }

    /// Load a private key from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Refuse key files readable by group or others
        let metadata = fs::metadata(path).map_err(|e| {
            WgEmbedError::Validation(format!("Failed to read key file {:?}: {}", path, e))
        })?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(WgEmbedError::Validation(format!(
                "Private key file {:?} has insecure permissions: {:o} (should be 0600)",
                path,
                mode & 0o777
            )));
        }

        let content = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
            WgEmbedError::Validation(format!("Failed to read private key file {:?}: {}", path, e))
        })?);

        Self::from_base64(content.trim())
    }

    /// Save the private key to a file with secure permissions (0600)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_key_file(path.as_ref(), &self.to_base64())
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(*self.secret)
    }

    /// Convert to the UAPI hex form
    pub fn to_hex(&self) -> String {
        hex::encode(*self.secret)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.secret);
        let public = X25519PublicKey::from(&secret);
        PublicKey {
            key: public.to_bytes(),
        }
    }

    /// Get raw bytes (for boringtun)
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// WireGuard public key (32 bytes, x25519)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: [u8; KEY_LEN],
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { key: bytes }
    }

    /// Parse a public key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        decode_base64(s, "public key").map(Self::from_bytes)
    }

    /// Parse a public key from its UAPI hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex(s, "public key").map(Self::from_bytes)
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    /// Convert to the UAPI hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Get raw bytes (for boringtun)
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// Optional symmetric key mixed into the handshake
#[derive(Clone, PartialEq, Eq)]
pub struct PresharedKey {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl PresharedKey {
    /// Generate a new random preshared key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Create a preshared key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(bytes),
        }
    }

    /// Parse a preshared key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        decode_base64(s, "preshared key").map(Self::from_bytes)
    }

    /// Parse a preshared key from its UAPI hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex(s, "preshared key").map(Self::from_bytes)
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(*self.key)
    }

    /// Convert to the UAPI hex form
    pub fn to_hex(&self) -> String {
        hex::encode(*self.key)
    }

    /// The all-zero key the UAPI uses to mean "no preshared key"
    pub fn is_zero(&self) -> bool {
        self.key.iter().all(|b| *b == 0)
    }

    /// Save the key to a file with secure permissions (0600)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_key_file(path.as_ref(), &self.to_base64())
    }

    /// Get raw bytes (for boringtun)
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey([REDACTED])")
    }
}

fn write_key_file(path: &Path, encoded: &str) -> Result<()> {
    // Create file with restricted permissions from the start
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| {
            WgEmbedError::Resource(format!("Failed to create key file {:?}: {}", path, e))
        })?;

    file.write_all(encoded.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| WgEmbedError::Resource(format!("Failed to write key file {:?}: {}", path, e)))
}

/// WireGuard key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    /// Private key
    pub private: PrivateKey,
    /// Public key (derived from private)
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Create a key pair from a private key
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_private_key_to_base64() {
        let private = PrivateKey::generate();
        assert_eq!(private.to_base64().len(), 44); // Base64 of 32 bytes
    }

    #[test]
    fn test_public_key_derivation_is_stable() {
        let private = PrivateKey::generate();
        assert_eq!(private.public_key(), private.public_key());
    }

    #[test]
    fn test_known_public_key() {
        // RFC 7748 section 6.1, Alice's key pair
        let private = PrivateKey::from_hex(
            "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a",
        )
        .unwrap();
        assert_eq!(
            private.public_key().to_hex(),
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
        );
    }

    #[test]
    fn test_hex_and_base64_agree() {
        let public = PrivateKey::generate().public_key();
        let from_hex = PublicKey::from_hex(&public.to_hex()).unwrap();
        let from_b64 = PublicKey::from_base64(&public.to_base64()).unwrap();
        assert_eq!(from_hex, from_b64);
    }

    #[test]
    fn test_private_key_not_logged() {
        let private = PrivateKey::generate();
        let debug_str = format!("{:?}", private);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains(&private.to_base64()));

        let psk = PresharedKey::generate();
        assert!(!format!("{:?}", psk).contains(&psk.to_base64()));
    }

    #[test]
    fn test_save_and_load_private_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("private.key");
        let private = PrivateKey::generate();

        private.save_to_file(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let loaded = PrivateKey::from_file(&path).unwrap();
        assert_eq!(private, loaded);
    }

    #[test]
    fn test_insecure_key_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("private.key");
        PrivateKey::generate().save_to_file(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(PrivateKey::from_file(&path).is_err());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(PrivateKey::from_base64("invalid!@#$").is_err());
        assert!(PublicKey::from_base64(&BASE64.encode([0u8; 16])).is_err());
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PresharedKey::from_base64("not a key").is_err());
    }

    #[test]
    fn test_zero_preshared_key() {
        assert!(PresharedKey::from_bytes([0u8; KEY_LEN]).is_zero());
        assert!(!PresharedKey::from_bytes([1u8; KEY_LEN]).is_zero());
    }
}
