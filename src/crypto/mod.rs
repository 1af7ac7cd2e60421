//! Cryptographic primitives for ktwo.
//!
//! This module provides:
//! - Argon2 password-based key derivation (`kdf`)
//! - Credentials and HKDF-derived sub-keys (`keys`)
//! - AES-256-GCM encryption and decryption (`encryption`)
//! - In-memory protection of field values (`protect`)

pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod protect;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{derive_key, KdfParams, ProtectedValue, ...};
pub use encryption::{decrypt, encrypt};
pub use kdf::{derive_key, generate_salt, KdfCost, KdfParams, KdfVariant};
pub use keys::Credentials;
pub use protect::ProtectedValue;
