#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Key derivation for named IPC objects
//!
//! Every process that agrees on a resource name must land on the same
//! SysV key without talking to anyone else first. Keys are folded out of a
//! BLAKE3 digest of the full name, so two unrelated names only share kernel
//! objects on a 32-bit collision.

use bulwark_errors::{Error, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `IPC_PRIVATE` is key 0 on every SysV implementation and never rendezvous.
const IPC_PRIVATE: i32 = 0;

/// Separates the key space of different object kinds sharing one name.
///
/// A bulkhead and a sliding window called `"mysql"` must not collide,
/// since their semaphore sets have different shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySpace {
    Resource,
    Window,
}

impl KeySpace {
    fn tag(self) -> &'static [u8] {
        match self {
            Self::Resource => b"bulwark.resource",
            Self::Window => b"bulwark.window",
        }
    }
}

/// A BLAKE3 digest of a namespaced resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameDigest {
    bytes: [u8; 32],
}

impl NameDigest {
    /// Digest `name` within `space`
    #[must_use]
    pub fn of(space: KeySpace, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(space.tag());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        Self {
            bytes: *hasher.finalize().as_bytes(),
        }
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// The SysV key for this digest
    #[must_use]
    pub fn ipc_key(&self) -> IpcKey {
        IpcKey::fold(&self.bytes)
    }
}

impl fmt::Display for NameDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A SysV IPC key (`key_t`) derived from a resource name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpcKey(i32);

impl IpcKey {
    fn fold(bytes: &[u8; 32]) -> Self {
        let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if raw == IPC_PRIVATE {
            Self(1)
        } else {
            Self(raw)
        }
    }

    /// The raw value handed to `semget`/`shmget`
    #[must_use]
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for IpcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ipcs prints keys as zero-padded hex
        write!(f, "0x{:08x}", self.0)
    }
}

/// Derive the SysV key for `name` within `space`
///
/// Pure and deterministic: any process computing this for the same inputs
/// gets the same key.
///
/// # Errors
///
/// Returns an error if `name` is empty.
pub fn derive_key(space: KeySpace, name: &str) -> Result<IpcKey, Error> {
    if name.is_empty() {
        return Err(SyncError::internal(name, "derive_key", "resource name must not be empty").into());
    }
    Ok(NameDigest::of(space, name).ipc_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_key(KeySpace::Window, "mysql_shard_0").unwrap();
        let b = derive_key(KeySpace::Window, "mysql_shard_0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let window = derive_key(KeySpace::Window, "redis").unwrap();
        let resource = derive_key(KeySpace::Resource, "redis").unwrap();
        assert_ne!(window, resource);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(derive_key(KeySpace::Resource, "").is_err());
    }

    #[test]
    fn test_fold_never_yields_ipc_private() {
        assert_eq!(IpcKey::fold(&[0; 32]).as_raw(), 1);
    }

    #[test]
    fn test_key_display_is_hex() {
        let key = IpcKey(0x1234);
        assert_eq!(key.to_string(), "0x00001234");
    }

    #[test]
    fn test_digest_serialization() {
        let key = derive_key(KeySpace::Resource, "test").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: IpcKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
