//! Where local files live.
//!
//! Everything sits flat under one configuration root:
//!
//! ```text
//! <root>/settings.toml     global settings (optional)
//! <root>/<vault>.k2db      vault container
//! <root>/<vault>.json      sync sidecar
//! <root>/remote/           default directory-backed remote
//! ```

use std::path::{Path, PathBuf};

use crate::errors::{KtwoError, Result};
use crate::sync::remote::{CONTAINER_EXT, SIDECAR_EXT};

/// Environment variable overriding the configuration root.
pub const HOME_ENV: &str = "KTWO_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$KTWO_HOME`, or `$HOME/.config/ktwo`.
    pub fn from_env() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        let home = std::env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                KtwoError::Config(format!("neither {HOME_ENV} nor HOME is set"))
            })?;
        Ok(Self::new(PathBuf::from(home).join(".config").join("ktwo")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn container(&self, vault: &str) -> PathBuf {
        self.root.join(format!("{vault}.{CONTAINER_EXT}"))
    }

    pub fn sidecar(&self, vault: &str) -> PathBuf {
        self.root.join(format!("{vault}.{SIDECAR_EXT}"))
    }

    /// Default location of the directory-backed remote.
    pub fn remote_dir(&self) -> PathBuf {
        self.root.join("remote")
    }
}

/// Check that a vault name is safe to use as a file name.
///
/// Allowed: ASCII letters, digits, `_`, `-` and `.`, 1 to 64 characters,
/// not starting with a dot.
pub fn validate_vault_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KtwoError::InvalidParameters(
            "vault name cannot be empty".into(),
        ));
    }

    if name.len() > 64 {
        return Err(KtwoError::InvalidParameters(
            "vault name cannot exceed 64 characters".into(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(KtwoError::InvalidParameters(format!(
            "vault name '{name}' is invalid: only letters, digits, '_', '-' and '.' are allowed"
        )));
    }

    if name.starts_with('.') {
        return Err(KtwoError::InvalidParameters(format!(
            "vault name '{name}' cannot start with a dot"
        )));
    }

    Ok(())
}
