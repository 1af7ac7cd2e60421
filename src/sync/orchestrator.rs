//! The sync pipeline.
//!
//! ```text
//! unlock-local → fetch-remote → unlock-remote → merge → encode → persist-local → push-remote
//! ```
//!
//! Every stage either completes or aborts the whole run; errors come
//! back wrapped in `KtwoError::SyncAborted` naming the stage. The local
//! file is always written before anything is pushed, so a failed push
//! leaves a consistent local vault and re-running `sync` retries it.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::gateway::BlobStore;
use super::remote::{ObjectTags, RemoteRef};
use super::SyncStage;
use crate::config::{SyncConfig, VaultPaths};
use crate::crypto::derive_key;
use crate::errors::{KtwoError, Result};
use crate::merge::{self, EditState, MergeReport};
use crate::vault::format::{self, write_atomic};
use crate::vault::VaultStore;

/// What a successful `sync` did.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub remote: RemoteRef,
    /// `None` when there was no remote copy yet and local was published.
    pub report: Option<MergeReport>,
    /// Entries in the vault after the sync.
    pub entries: usize,
}

/// Runs sync, pull and publish against one gateway.
pub struct SyncOrchestrator<'a, S: BlobStore + ?Sized> {
    gateway: &'a S,
    paths: VaultPaths,
    prefix: String,
}

impl<'a, S: BlobStore + ?Sized> SyncOrchestrator<'a, S> {
    pub fn new(gateway: &'a S, paths: VaultPaths, prefix: &str) -> Self {
        Self {
            gateway,
            paths,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Where vault `name` lives remotely, per its sidecar.
    pub fn remote_for(&self, config: &SyncConfig) -> Result<RemoteRef> {
        let bucket = config.bucket().ok_or_else(|| {
            KtwoError::Config(format!(
                "vault '{}' has no sync bucket; create it with `k2 newdb {} -s s3://<bucket>`",
                config.name, config.name
            ))
        })?;
        let prefix = config.remote_prefix.as_deref().unwrap_or(&self.prefix);
        RemoteRef::for_vault(bucket, prefix, &config.name)
    }

    /// Merge the remote copy of `vault` into the local one and publish
    /// the result.
    pub fn sync(&self, vault: &str, password: &[u8]) -> Result<SyncOutcome> {
        let config = SyncConfig::load(&self.paths.sidecar(vault), vault)?;
        let remote = self.remote_for(&config)?;

        // unlock-local
        let mut store = VaultStore::open(&self.paths.container(vault), password)
            .map_err(|e| e.at(SyncStage::UnlockLocal))?;
        debug!(vault, "unlocked local vault");

        self.reconcile(&mut store, &config, remote, password)
    }

    /// fetch-remote through push-remote for an unlocked local vault.
    fn reconcile(
        &self,
        store: &mut VaultStore,
        config: &SyncConfig,
        remote: RemoteRef,
        password: &[u8],
    ) -> Result<SyncOutcome> {
        let keys = remote.keys();

        // fetch-remote
        let fetched = self
            .gateway
            .get(&remote.bucket, &keys.container)
            .map_err(|e| e.at(SyncStage::FetchRemote))?;

        let report = match fetched {
            None => {
                info!(remote = %remote, "no remote copy yet, publishing local vault");
                let snapshot = EditState::capture(store.vault())
                    .encode()
                    .map_err(|e| e.at(SyncStage::Encode))?;
                store.vault_mut().edit_state = Some(snapshot);
                None
            }
            Some(remote_bytes) => {
                // unlock-remote
                let remote_vault = (|| {
                    let kdf = format::peek_kdf(&remote_bytes)?;
                    if store.credentials().matches(&kdf) {
                        format::decrypt_container(&remote_bytes, store.credentials())
                    } else {
                        debug!("remote uses different KDF parameters, deriving its key");
                        let credentials = derive_key(password, &kdf)?;
                        format::decrypt_container(&remote_bytes, &credentials)
                    }
                })()
                .map_err(|e| e.at(SyncStage::UnlockRemote))?;

                // merge
                let base = match EditState::of(store.vault()) {
                    Ok(base) => base,
                    Err(e) => {
                        warn!(error = %e, "edit state unreadable, merging without a common base");
                        EditState::empty()
                    }
                };
                let outcome = merge::merge(store.vault(), &remote_vault, &base)
                    .map_err(|e| e.at(SyncStage::Merge))?;
                store
                    .replace_vault(outcome.vault)
                    .map_err(|e| e.at(SyncStage::Merge))?;
                Some(outcome.report)
            }
        };

        // encode
        let bytes = store.encode().map_err(|e| e.at(SyncStage::Encode))?;

        // persist-local
        write_atomic(store.path(), &bytes).map_err(|e| e.at(SyncStage::PersistLocal))?;

        // push-remote
        self.push(&remote, config, &bytes)
            .map_err(|e| e.at(SyncStage::PushRemote))?;

        info!(remote = %remote, "sync complete");
        Ok(SyncOutcome {
            remote,
            report,
            entries: store.vault().entries.len(),
        })
    }

    /// Download a vault and its sidecar into the config root.
    ///
    /// Refuses to touch an existing local copy; use `sync` for that.
    /// No password is needed: the container is stored as fetched.
    pub fn pull(&self, remote: &RemoteRef) -> Result<PathBuf> {
        let container_path = self.paths.container(&remote.name);
        let sidecar_path = self.paths.sidecar(&remote.name);
        for path in [&container_path, &sidecar_path] {
            if path.exists() {
                return Err(KtwoError::AlreadyExists(path.clone()));
            }
        }

        let keys = remote.keys();
        let fetch = || -> Result<(Vec<u8>, Option<Vec<u8>>)> {
            let container = self
                .gateway
                .get(&remote.bucket, &keys.container)?
                .ok_or_else(|| {
                    KtwoError::RemoteUnavailable(format!(
                        "no vault at {}/{}",
                        remote.bucket, keys.container
                    ))
                })?;
            let sidecar = self.gateway.get(&remote.bucket, &keys.sidecar)?;
            Ok((container, sidecar))
        };
        let (container, sidecar) = fetch().map_err(|e| e.at(SyncStage::FetchRemote))?;

        let persist = || -> Result<()> {
            format::parse(&container)?;
            let mut config = match &sidecar {
                Some(bytes) => SyncConfig::from_bytes(bytes)?,
                None => {
                    warn!(remote = %remote, "remote has no sync config, writing a fresh one");
                    SyncConfig::new(&remote.name, None)
                }
            };
            // Later syncs must find the copy where it was pulled from.
            config.sync_bucket = format!("s3://{}", remote.bucket);
            config.remote_prefix = (remote.prefix != self.prefix).then(|| remote.prefix.clone());
            write_atomic(&container_path, &container)?;
            config.save(&sidecar_path)
        };
        persist().map_err(|e| e.at(SyncStage::PersistLocal))?;

        info!(remote = %remote, path = %container_path.display(), "pulled vault");
        Ok(container_path)
    }

    /// Save a vault locally, then merge it with the remote copy and push
    /// the result if its sidecar names a bucket.
    ///
    /// Returns `None` for a local-only vault. A failure of the local save
    /// carries no stage; every later failure is tagged with its stage and
    /// leaves the saved local file in place.
    pub fn publish(
        &self,
        store: &mut VaultStore,
        config: &SyncConfig,
        password: &[u8],
    ) -> Result<Option<SyncOutcome>> {
        store.save()?;
        if config.bucket().is_none() {
            return Ok(None);
        }
        let remote = self
            .remote_for(config)
            .map_err(|e| e.at(SyncStage::FetchRemote))?;
        self.reconcile(store, config, remote, password).map(Some)
    }

    fn push(&self, remote: &RemoteRef, config: &SyncConfig, container: &[u8]) -> Result<()> {
        let keys = remote.keys();
        self.gateway.put(
            &remote.bucket,
            &keys.container,
            container,
            &ObjectTags::container(),
        )?;
        self.gateway.put(
            &remote.bucket,
            &keys.sidecar,
            &config.to_bytes()?,
            &ObjectTags::sidecar(),
        )?;
        debug!(remote = %remote, size = container.len(), "pushed vault");
        Ok(())
    }
}
