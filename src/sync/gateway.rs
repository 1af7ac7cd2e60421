//! Storage gateway: a bucket/key blob store.
//!
//! The orchestrator only needs `get` and `put`. Three implementations:
//!
//! - `DirectoryStore`: each bucket is a directory under a root path.
//! - `MemoryStore`: an in-process map, for tests and dry runs.
//! - `HttpStore` (feature `http-store`): plain HTTP GET/PUT against an
//!   S3-compatible endpoint using path-style URLs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::remote::ObjectTags;
use crate::errors::{KtwoError, Result};
use crate::vault::format::write_atomic;

/// Blob storage addressed by bucket and key.
pub trait BlobStore {
    /// Fetch an object. `Ok(None)` means it does not exist.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace an object.
    fn put(&self, bucket: &str, key: &str, bytes: &[u8], tags: &ObjectTags) -> Result<()>;
}

fn unavailable(bucket: &str, key: &str, err: impl std::fmt::Display) -> KtwoError {
    KtwoError::RemoteUnavailable(format!("{bucket}/{key}: {err}"))
}

// ---------------------------------------------------------------------------
// DirectoryStore
// ---------------------------------------------------------------------------

/// Buckets as directories: object `bucket/key` is the file
/// `<root>/<bucket>/<key>`. Tags are written next to it as `<file>.tags`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in std::iter::once(bucket).chain(key.split('/')) {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(KtwoError::InvalidParameters(format!(
                    "invalid object path '{bucket}/{key}'"
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl BlobStore for DirectoryStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(bucket, key, e)),
        }
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8], tags: &ObjectTags) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        write_atomic(&path, bytes).map_err(|e| unavailable(bucket, key, e))?;

        let mut tag_path = path.into_os_string();
        tag_path.push(".tags");
        write_atomic(Path::new(&tag_path), tags.to_query().as_bytes())
            .map_err(|e| unavailable(bucket, key, e))?;

        debug!(bucket, key, size = bytes.len(), "stored object");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    tags: String,
}

/// In-memory blob store. Can be switched offline to simulate outages.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    offline: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `RemoteUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut flag) = self.offline.lock() {
            *flag = offline;
        }
    }

    /// Tags of a stored object, in query form.
    pub fn tags(&self, bucket: &str, key: &str) -> Option<String> {
        let objects = self.objects.lock().ok()?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.tags.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self, bucket: &str, key: &str) -> Result<()> {
        let offline = self
            .offline
            .lock()
            .map_err(|_| unavailable(bucket, key, "store lock poisoned"))?;
        if *offline {
            return Err(unavailable(bucket, key, "store is offline"));
        }
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_online(bucket, key)?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| unavailable(bucket, key, "store lock poisoned"))?;
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.bytes.clone()))
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8], tags: &ObjectTags) -> Result<()> {
        self.check_online(bucket, key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| unavailable(bucket, key, "store lock poisoned"))?;
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: bytes.to_vec(),
                tags: tags.to_query(),
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HttpStore
// ---------------------------------------------------------------------------

/// Path-style HTTP object store: `PUT {endpoint}/{bucket}/{key}`.
///
/// Requests are unsigned, so the endpoint has to accept them (a local
/// S3-compatible server, or a gateway that signs on our behalf).
#[cfg(feature = "http-store")]
#[derive(Debug, Clone)]
pub struct HttpStore {
    endpoint: String,
}

#[cfg(feature = "http-store")]
impl HttpStore {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{bucket}/{key}", self.endpoint)
    }
}

#[cfg(feature = "http-store")]
impl BlobStore for HttpStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url(bucket, key);
        match ureq::get(&url)
            .header("User-Agent", concat!("ktwo/", env!("CARGO_PKG_VERSION")))
            .call()
        {
            Ok(mut response) => {
                let bytes = response
                    .body_mut()
                    .read_to_vec()
                    .map_err(|e| unavailable(bucket, key, e))?;
                debug!(bucket, key, size = bytes.len(), "fetched object");
                Ok(Some(bytes))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(unavailable(bucket, key, e)),
        }
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8], tags: &ObjectTags) -> Result<()> {
        let url = self.url(bucket, key);
        ureq::put(&url)
            .header("User-Agent", concat!("ktwo/", env!("CARGO_PKG_VERSION")))
            .header("Content-Type", "application/octet-stream")
            .header("x-amz-tagging", &tags.to_query())
            .send(bytes)
            .map_err(|e| unavailable(bucket, key, e))?;
        debug!(bucket, key, size = bytes.len(), "stored object");
        Ok(())
    }
}
