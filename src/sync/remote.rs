//! Remote references, object keys and object tags.
//!
//! A vault named `vault1` synced to bucket `my-bucket` with the default
//! prefix lives at:
//!
//! ```text
//! my-bucket : k2/vault1/vault1.k2db   (container)
//! my-bucket : k2/vault1/vault1.json   (sidecar config)
//! ```
//!
//! `k2 pull s3://my-bucket/k2/vault1` names the same pair.

use std::fmt;

use crate::errors::{KtwoError, Result};

/// Scheme accepted in front of remote references.
const SCHEME: &str = "s3://";

/// File extension of the vault container.
pub const CONTAINER_EXT: &str = "k2db";

/// File extension of the sidecar config.
pub const SIDECAR_EXT: &str = "json";

/// Tag value identifying objects written by this tool.
const APPLICATION: &str = "k2";

// ---------------------------------------------------------------------------
// RemoteRef
// ---------------------------------------------------------------------------

/// A parsed `s3://bucket/prefix/name` reference to a remote vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub bucket: String,
    /// Key path between the bucket and the vault directory; may be empty.
    pub prefix: String,
    /// Vault name (the last path segment).
    pub name: String,
}

impl RemoteRef {
    /// Parse a full remote reference such as `s3://my-bucket/k2/vault1`.
    ///
    /// The scheme is optional. At least a bucket and a name are required.
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input.strip_prefix(SCHEME).unwrap_or(input);
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        let invalid = || {
            KtwoError::InvalidParameters(format!(
                "remote reference '{input}' must look like s3://bucket/prefix/name"
            ))
        };

        let (bucket, path) = segments.split_first().ok_or_else(invalid)?;
        let (name, prefix) = path.split_last().ok_or_else(invalid)?;
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(invalid());
        }

        Ok(Self {
            bucket: (*bucket).to_string(),
            prefix: prefix.join("/"),
            name: (*name).to_string(),
        })
    }

    /// Reference for vault `name` under the configured bucket and prefix.
    ///
    /// `sync_bucket` is the value stored in the sidecar, e.g.
    /// `s3://my-bucket`; anything after the bucket name is ignored.
    pub fn for_vault(sync_bucket: &str, prefix: &str, name: &str) -> Result<Self> {
        let rest = sync_bucket.strip_prefix(SCHEME).unwrap_or(sync_bucket);
        let bucket = rest
            .split('/')
            .find(|s| !s.is_empty())
            .ok_or_else(|| {
                KtwoError::Config(format!("sync bucket '{sync_bucket}' has no bucket name"))
            })?;

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            name: name.to_string(),
        })
    }

    /// Object keys of the container and sidecar.
    pub fn keys(&self) -> ObjectKeys {
        ObjectKeys::new(&self.prefix, &self.name)
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{SCHEME}{}/{}", self.bucket, self.name)
        } else {
            write!(f, "{SCHEME}{}/{}/{}", self.bucket, self.prefix, self.name)
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectKeys
// ---------------------------------------------------------------------------

/// The two object keys a vault occupies in its bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    pub container: String,
    pub sidecar: String,
}

impl ObjectKeys {
    /// `<prefix>/<base>/<base>.<ext>`, where `<base>` is the vault name
    /// up to its first `.`.
    pub fn new(prefix: &str, name: &str) -> Self {
        let base = name.split('.').next().unwrap_or(name);
        let dir = if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{prefix}/{base}")
        };
        Self {
            container: format!("{dir}/{base}.{CONTAINER_EXT}"),
            sidecar: format!("{dir}/{base}.{SIDECAR_EXT}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectTags
// ---------------------------------------------------------------------------

/// Content labels attached to uploaded objects.
///
/// Informational only; nothing checks them on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTags(Vec<(String, String)>);

impl ObjectTags {
    pub fn container() -> Self {
        Self::of_type(CONTAINER_EXT)
    }

    pub fn sidecar() -> Self {
        Self::of_type("k2config")
    }

    fn of_type(kind: &str) -> Self {
        Self(vec![
            ("application".to_string(), APPLICATION.to_string()),
            ("type".to_string(), kind.to_string()),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// URL-query form, e.g. `application=k2&type=k2db`.
    pub fn to_query(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}
