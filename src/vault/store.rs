//! High-level handle on a local container file.
//!
//! `VaultStore` wraps the container format and the crypto layer so the
//! CLI and the sync orchestrator can work with simple calls like
//! `VaultStore::open(path, password)` and `store.save()`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::crypto::{derive_key, Credentials, KdfCost, KdfParams};
use crate::errors::{KtwoError, Result};

use super::format;
use super::model::Vault;

/// An unlocked vault bound to its file on disk.
pub struct VaultStore {
    /// Path to the `.k2db` file.
    path: PathBuf,

    /// The decrypted tree.
    vault: Vault,

    /// Derived key material (zeroized on drop).
    credentials: Credentials,
}

impl VaultStore {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a brand-new vault file at `path` (the `newdb` operation).
    ///
    /// Generates a random salt, derives credentials from the password,
    /// and writes a vault containing only its default group.
    pub fn create(path: &Path, name: &str, password: &[u8], cost: &KdfCost) -> Result<Self> {
        if path.exists() {
            return Err(KtwoError::AlreadyExists(path.to_path_buf()));
        }

        let kdf = KdfParams::generate(cost)?;
        let credentials = derive_key(password, &kdf)?;
        let vault = Vault::new(name, kdf);

        let mut store = Self {
            path: path.to_path_buf(),
            vault,
            credentials,
        };
        store.save()?;
        debug!(path = %path.display(), "created vault");

        Ok(store)
    }

    /// Open an existing vault file with a password.
    pub fn open(path: &Path, password: &[u8]) -> Result<Self> {
        let bytes = format::read_file(path)?;
        let kdf = format::peek_kdf(&bytes)?;
        let credentials = derive_key(password, &kdf)?;
        let vault = format::decrypt_container(&bytes, &credentials)?;

        Ok(Self {
            path: path.to_path_buf(),
            vault,
            credentials,
        })
    }

    /// Build a `VaultStore` from pre-constructed parts.
    pub fn from_parts(path: PathBuf, vault: Vault, credentials: Credentials) -> Self {
        Self {
            path,
            vault,
            credentials,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Encrypt the vault into container bytes without touching disk.
    pub fn encode(&self) -> Result<Vec<u8>> {
        format::encrypt_container(&self.vault, &self.credentials)
    }

    /// Encrypt the vault and write it to disk atomically.
    ///
    /// Returns the bytes that were written.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let bytes = self.encode()?;
        format::write_atomic(&self.path, &bytes)?;
        Ok(bytes)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn vault_mut(&mut self) -> &mut Vault {
        &mut self.vault
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Replace the in-memory tree (e.g. with a merge result).
    ///
    /// The new tree must use the same KDF parameters.
    pub fn replace_vault(&mut self, vault: Vault) -> Result<()> {
        if vault.kdf != self.vault.kdf {
            return Err(KtwoError::InvalidParameters(
                "replacement vault uses different KDF parameters".into(),
            ));
        }
        self.vault = vault;
        Ok(())
    }
}
