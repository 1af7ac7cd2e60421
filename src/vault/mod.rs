//! Vault module — the credential tree and its encrypted container.
//!
//! This module provides:
//! - Groups, entries, fields and tombstones (`model`)
//! - Tree serialization independent of encryption (`codec`)
//! - The binary container with authenticated header (`format`)
//! - `VaultStore` for creating, opening and saving local files (`store`)

pub mod codec;
pub mod format;
pub mod model;
pub mod store;

// Re-export the most commonly used items.
pub use format::{decrypt_container, encrypt_container};
pub use model::{Entry, EntryFields, FieldValue, Group, Times, Timestamp, Vault};
pub use store::VaultStore;
