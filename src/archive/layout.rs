use std::fmt;

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

/// Length of the boundary marker separating the stub from the key.
pub const BOUNDARY_LEN: usize = 64;

/// Length of the per-archive identity key.
pub const KEY_LEN: usize = 16;

/// Offset at which the boundary search gives up.
///
/// A failsafe against big, corrupted images; far larger than any stub this
/// crate compiles to.
pub const MAX_BOUNDARY_OFFSET: u64 = 100_000_000;

/// Name of the marker file recording which archive populated a directory.
pub const KEY_FILE_NAME: &str = ".selfextract.key";

/// Compute the boundary marker.
///
/// Derived at run time on purpose: a literal copy in the binary would be
/// found inside the stub itself.
pub fn boundary() -> [u8; BOUNDARY_LEN] {
    let digest = Sha512::digest(b"boundary");
    let mut out = [0u8; BOUNDARY_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Random identity of one built archive.
///
/// Not a secret, only compared against the marker file of an extraction
/// directory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Generate a fresh key from the operating system RNG.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("generating random key")?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form, as stored in the marker file.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compare against the content of a marker file, ignoring surrounding
    /// whitespace.
    pub fn matches_marker(&self, marker: &str) -> bool {
        marker.trim() == self.to_hex()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_hex())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
