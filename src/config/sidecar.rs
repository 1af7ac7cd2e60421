//! Per-vault sync sidecar (`<vault>.json`).
//!
//! Holds the vault's display name and the bucket it syncs to. It is
//! uploaded next to the container so `k2 pull` can restore both.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{KtwoError, Result};
use crate::vault::format::write_atomic;
use crate::vault::model::Extra;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub name: String,

    /// Remote bucket reference, e.g. `s3://my-bucket`. Empty or absent
    /// means the vault is local only.
    #[serde(default)]
    pub sync_bucket: String,

    /// Key prefix inside the bucket when it differs from the global
    /// setting (set by `k2 pull`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_prefix: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl SyncConfig {
    pub fn new(name: &str, sync_bucket: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            sync_bucket: sync_bucket.unwrap_or_default().to_string(),
            remote_prefix: None,
            extra: Extra::new(),
        }
    }

    /// The configured bucket, if any.
    pub fn bucket(&self) -> Option<&str> {
        Some(self.sync_bucket.trim()).filter(|b| !b.is_empty())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| KtwoError::Config(format!("invalid sync config: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| KtwoError::Serialization(format!("sync config: {e}")))
    }

    /// Load a sidecar. A missing file reads as a local-only vault.
    pub fn load(path: &Path, vault: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(vault, None));
        }
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
            .map_err(|e| KtwoError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?)
    }
}
