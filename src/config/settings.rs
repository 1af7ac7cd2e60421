use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{KdfCost, KdfVariant};
use crate::errors::{KtwoError, Result};

/// Global configuration, loaded from `<config root>/settings.toml`.
///
/// Every field has a sensible default so ktwo works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Argon2 flavour for new vaults.
    #[serde(default = "default_kdf_variant")]
    pub kdf_variant: KdfVariant,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Derived key length in bytes (default: 32).
    #[serde(default = "default_argon2_output_len")]
    pub argon2_output_len: u32,

    /// Key prefix inside the sync bucket (default: "k2").
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,

    /// Where buckets live: a directory path, or an `http(s)://` endpoint
    /// when built with `http-store`. Defaults to `<config root>/remote`.
    #[serde(default)]
    pub remote_endpoint: Option<String>,

    /// Length of passwords generated by `k2 add` (default: 20).
    #[serde(default = "default_password_length")]
    pub password_length: usize,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_kdf_variant() -> KdfVariant {
    KdfVariant::Argon2id
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_argon2_output_len() -> u32 {
    32
}

fn default_remote_prefix() -> String {
    "k2".to_string()
}

fn default_password_length() -> usize {
    20
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            kdf_variant: default_kdf_variant(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            argon2_output_len: default_argon2_output_len(),
            remote_prefix: default_remote_prefix(),
            remote_endpoint: None,
            password_length: default_password_length(),
        }
    }
}

impl Settings {
    /// Name of the settings file inside the config root.
    pub const FILE_NAME: &'static str = "settings.toml";

    /// Load settings from `<root>/settings.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            KtwoError::Config(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        if settings.password_length == 0 {
            return Err(KtwoError::Config(format!(
                "{}: password_length must be at least 1",
                config_path.display()
            )));
        }

        Ok(settings)
    }

    /// Convert the Argon2 settings into crypto-layer cost parameters.
    pub fn kdf_cost(&self) -> KdfCost {
        KdfCost {
            variant: self.kdf_variant,
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
            output_len: self.argon2_output_len,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
