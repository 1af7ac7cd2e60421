//! Credentials and the sub-keys derived from them with HKDF-SHA256.
//!
//! From the raw Argon2 output we derive:
//! - The AES-256-GCM key that encrypts the container payload.
//! - A dedicated HMAC key that authenticates the container header.
//!
//! HKDF (RFC 5869) uses the Argon2 output as input keying material
//! and a context string (`info`) to produce independent sub-keys.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use super::kdf::KdfParams;
use crate::errors::{KtwoError, Result};

/// Length of derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

const CIPHER_INFO: &[u8] = b"ktwo-container-cipher";
const HEADER_MAC_INFO: &[u8] = b"ktwo-header-mac";

/// Key material bound to one master password and one set of KDF params.
///
/// Never persisted. The key bytes are zeroed when dropped.
pub struct Credentials {
    bytes: Vec<u8>,
    kdf: KdfParams,
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Credentials {
    /// Wrap raw KDF output. Prefer `crypto::derive_key`.
    pub fn new(bytes: Vec<u8>, kdf: KdfParams) -> Self {
        Self { bytes, kdf }
    }

    /// Access the raw KDF output.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The KDF parameters these credentials were derived with.
    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Whether these credentials can open a container with `kdf`.
    pub fn matches(&self, kdf: &KdfParams) -> bool {
        &self.kdf == kdf
    }

    /// AES-256-GCM key for the container payload.
    pub fn cipher_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        hkdf_derive(&self.bytes, CIPHER_INFO)
    }

    /// HMAC-SHA256 key for the container header.
    pub fn header_mac_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        hkdf_derive(&self.bytes, HEADER_MAC_INFO)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bytes", &"***")
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Internal helper: run HKDF-SHA256 expand with the given `info`.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| KtwoError::InvalidParameters(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}
