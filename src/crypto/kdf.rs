//! Password-based key derivation using Argon2.
//!
//! Argon2 is a memory-hard KDF that protects against brute-force and
//! GPU-based attacks. Every vault carries its own `KdfParams` (salt
//! included) in the container header, fixed at creation time.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::keys::Credentials;
use crate::errors::{KtwoError, Result};

/// Length of a freshly generated salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Shortest salt accepted when reading a container.
const MIN_SALT_LEN: usize = 8;

/// Allowed range for the raw KDF output length.
const MIN_OUTPUT_LEN: u32 = 16;
const MAX_OUTPUT_LEN: u32 = 64;

/// Argon2 version 1.3, the only one we write.
pub const ARGON2_VERSION: u32 = 0x13;

/// Argon2 flavour ("type tag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfVariant {
    Argon2d,
    Argon2id,
}

impl KdfVariant {
    fn algorithm(self) -> Algorithm {
        match self {
            KdfVariant::Argon2d => Algorithm::Argon2d,
            KdfVariant::Argon2id => Algorithm::Argon2id,
        }
    }
}

impl std::str::FromStr for KdfVariant {
    type Err = KtwoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "argon2d" => Ok(KdfVariant::Argon2d),
            "argon2id" => Ok(KdfVariant::Argon2id),
            other => Err(KtwoError::InvalidParameters(format!(
                "unknown KDF variant '{other}' (expected argon2d or argon2id)"
            ))),
        }
    }
}

/// Tunable cost settings, without a salt.
///
/// These map 1:1 to the fields in `Settings` so the CLI can pass
/// whatever the user configured in `settings.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfCost {
    pub variant: KdfVariant,
    /// Memory cost in KiB (default: 65 536 = 64 MB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
    /// Raw output length in bytes (default: 32).
    pub output_len: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            variant: KdfVariant::Argon2id,
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
            output_len: 32,
        }
    }
}

/// The full KDF configuration of one vault, stored in its container header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub variant: KdfVariant,
    pub version: u32,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub output_len: u32,
}

impl KdfParams {
    /// Build parameters for a new vault with a fresh random salt.
    pub fn generate(cost: &KdfCost) -> Result<Self> {
        let params = Self {
            variant: cost.variant,
            version: ARGON2_VERSION,
            salt: generate_salt().to_vec(),
            memory_kib: cost.memory_kib,
            iterations: cost.iterations,
            parallelism: cost.parallelism,
            output_len: cost.output_len,
        };
        params.validate()?;
        Ok(params)
    }

    /// Reject parameter sets that cannot (or must not) be used.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib == 0 {
            return Err(KtwoError::InvalidParameters(
                "KDF memory cost must be positive".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(KtwoError::InvalidParameters(
                "KDF iterations must be positive".into(),
            ));
        }
        if self.parallelism == 0 {
            return Err(KtwoError::InvalidParameters(
                "KDF parallelism must be positive".into(),
            ));
        }
        if !(MIN_OUTPUT_LEN..=MAX_OUTPUT_LEN).contains(&self.output_len) {
            return Err(KtwoError::InvalidParameters(format!(
                "KDF output length must be between {MIN_OUTPUT_LEN} and {MAX_OUTPUT_LEN} bytes (got {})",
                self.output_len
            )));
        }
        if self.salt.len() < MIN_SALT_LEN {
            return Err(KtwoError::InvalidParameters(format!(
                "KDF salt must be at least {MIN_SALT_LEN} bytes (got {})",
                self.salt.len()
            )));
        }
        self.argon2_version()?;
        Ok(())
    }

    fn argon2_version(&self) -> Result<Version> {
        match self.version {
            0x13 => Ok(Version::V0x13),
            0x10 => Ok(Version::V0x10),
            other => Err(KtwoError::InvalidParameters(format!(
                "unsupported Argon2 version {other:#x}"
            ))),
        }
    }
}

/// Derive credentials from a password using the vault's KDF parameters.
///
/// The same password + params always produce the same key material.
pub fn derive_key(password: &[u8], kdf: &KdfParams) -> Result<Credentials> {
    kdf.validate()?;

    let params = Params::new(
        kdf.memory_kib,
        kdf.iterations,
        kdf.parallelism,
        Some(kdf.output_len as usize),
    )
    .map_err(|e| KtwoError::InvalidParameters(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(kdf.variant.algorithm(), kdf.argon2_version()?, params);

    let mut key = vec![0u8; kdf.output_len as usize];
    argon2
        .hash_password_into(password, &kdf.salt, &mut key)
        .map_err(|e| KtwoError::InvalidParameters(format!("Argon2 hashing failed: {e}")))?;

    Ok(Credentials::new(key, kdf.clone()))
}

/// Generate a cryptographically random 32-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
