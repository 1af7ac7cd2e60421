//! In-memory protection for sensitive field values.
//!
//! A `ProtectedValue` keeps its plaintext XOR-ed with a random pad of
//! the same length, so the secret never sits in memory as a contiguous
//! string and never leaks through `Debug` or formatting. `reveal` is the
//! only way back to plaintext.

use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// A field value held obfuscated in memory.
pub struct ProtectedValue {
    masked: Vec<u8>,
    pad: Vec<u8>,
}

impl ProtectedValue {
    /// Protect a plaintext string with a fresh random pad.
    pub fn protect(plaintext: &str) -> Self {
        Self::from_bytes(plaintext.as_bytes())
    }

    fn from_bytes(plain: &[u8]) -> Self {
        let mut pad = vec![0u8; plain.len()];
        rand::rng().fill_bytes(&mut pad);
        let masked = plain.iter().zip(&pad).map(|(p, k)| p ^ k).collect();
        Self { masked, pad }
    }

    /// Materialize the plaintext. The returned buffer is zeroed on drop.
    pub fn reveal(&self) -> Zeroizing<String> {
        let bytes = self.reveal_bytes();
        // `protect` only accepts `&str`, so the bytes are always UTF-8.
        Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Materialize the plaintext bytes. The returned buffer is zeroed on drop.
    pub fn reveal_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            self.masked
                .iter()
                .zip(&self.pad)
                .map(|(m, k)| m ^ k)
                .collect(),
        )
    }

    /// Length of the plaintext in bytes.
    pub fn len(&self) -> usize {
        self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masked.is_empty()
    }
}

impl Clone for ProtectedValue {
    /// Clones re-mask with a fresh pad.
    fn clone(&self) -> Self {
        Self::from_bytes(&self.reveal_bytes())
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        self.reveal_bytes().ct_eq(&other.reveal_bytes()).into()
    }
}

impl Eq for ProtectedValue {}

impl std::fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProtectedValue(***)")
    }
}

impl Drop for ProtectedValue {
    fn drop(&mut self) {
        self.masked.zeroize();
        self.pad.zeroize();
    }
}
