//! Content hashing for asset de-duplication.
//!
//! The digest is SHA-512 over the exact body bytes, stored as 64 raw bytes.
//! Changing the algorithm changes the on-disk format of asset records.

use sha2::{Digest, Sha512};
use std::fmt::{self, Write};

/// SHA-512 digest of an asset body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 64]);

impl ContentHash {
    /// Hashes the given bytes.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&Sha512::digest(data));
        Self(bytes)
    }

    /// Creates a hash from raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(128);
        for byte in self.0 {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({}…)", &hex[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
