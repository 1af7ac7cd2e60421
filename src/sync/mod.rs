//! Sync module : moving vaults between this machine and remote storage.
//!
//! - `remote`: remote references, object keys and tags
//! - `gateway`: the `BlobStore` trait and its implementations
//! - `orchestrator`: the sync / pull / publish pipelines

pub mod gateway;
pub mod orchestrator;
pub mod remote;

use std::fmt;

pub use gateway::{BlobStore, DirectoryStore, MemoryStore};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use remote::{ObjectKeys, ObjectTags, RemoteRef};

/// One step of the sync pipeline, named in abort messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    UnlockLocal,
    FetchRemote,
    UnlockRemote,
    Merge,
    Encode,
    PersistLocal,
    PushRemote,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::UnlockLocal => "unlock-local",
            SyncStage::FetchRemote => "fetch-remote",
            SyncStage::UnlockRemote => "unlock-remote",
            SyncStage::Merge => "merge",
            SyncStage::Encode => "encode",
            SyncStage::PersistLocal => "persist-local",
            SyncStage::PushRemote => "push-remote",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
