//! Integration tests for the sync pipeline against in-memory storage.

use ktwo::config::{SyncConfig, VaultPaths};
use ktwo::crypto::{derive_key, KdfCost, KdfParams};
use ktwo::errors::{KtwoError, Result};
use ktwo::sync::{BlobStore, MemoryStore, ObjectTags, RemoteRef, SyncOrchestrator, SyncStage};
use ktwo::vault::model::{self, FieldValue};
use ktwo::vault::{encrypt_container, VaultStore};
use tempfile::TempDir;

const PASSWORD: &[u8] = b"Str0ngPass";
const BUCKET: &str = "s3://team-bucket";
const VAULT: &str = "vault1";

fn cheap_cost() -> KdfCost {
    KdfCost {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
        ..KdfCost::default()
    }
}

/// A machine with a fresh vault and a sidecar pointing at the bucket.
fn new_machine(dir: &TempDir, bucket: Option<&str>) -> VaultPaths {
    let paths = VaultPaths::new(dir.path());
    VaultStore::create(&paths.container(VAULT), VAULT, PASSWORD, &cheap_cost()).unwrap();
    SyncConfig::new(VAULT, bucket)
        .save(&paths.sidecar(VAULT))
        .unwrap();
    paths
}

fn add_entry(paths: &VaultPaths, title: &str) {
    let mut store = VaultStore::open(&paths.container(VAULT), PASSWORD).unwrap();
    let root = store.vault().root;
    let e = store.vault_mut().create_entry(root).unwrap();
    store
        .vault_mut()
        .set_field(e, model::TITLE, FieldValue::plain(title))
        .unwrap();
    store.save().unwrap();
}

fn titles(paths: &VaultPaths) -> Vec<String> {
    let store = VaultStore::open(&paths.container(VAULT), PASSWORD).unwrap();
    let mut t: Vec<String> = store
        .vault()
        .walk()
        .into_iter()
        .map(|(_, e)| e.title().to_string())
        .collect();
    t.sort();
    t
}

fn remote() -> RemoteRef {
    RemoteRef::parse("s3://team-bucket/k2/vault1").unwrap()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[test]
fn first_sync_publishes_the_local_vault() {
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let gateway = MemoryStore::new();
    let orchestrator = SyncOrchestrator::new(&gateway, paths, "k2");

    let outcome = orchestrator.sync(VAULT, PASSWORD).unwrap();

    assert!(outcome.report.is_none());
    assert_eq!(outcome.remote, remote());
    assert_eq!(gateway.len(), 2);
    assert_eq!(
        gateway.tags("team-bucket", "k2/vault1/vault1.k2db").as_deref(),
        Some("application=k2&type=k2db")
    );
    assert_eq!(
        gateway.tags("team-bucket", "k2/vault1/vault1.json").as_deref(),
        Some("application=k2&type=k2config")
    );
}

#[test]
fn two_replicas_converge() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    let a = SyncOrchestrator::new(&gateway, paths_a.clone(), "k2");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&remote()).unwrap();

    add_entry(&paths_a, "from-a");
    add_entry(&paths_b, "from-b");

    b.sync(VAULT, PASSWORD).unwrap();
    let outcome = a.sync(VAULT, PASSWORD).unwrap();
    assert!(outcome.report.unwrap().conflicts.is_empty());
    b.sync(VAULT, PASSWORD).unwrap();

    assert_eq!(titles(&paths_a), vec!["from-a", "from-b"]);
    assert_eq!(titles(&paths_a), titles(&paths_b));

    let va = VaultStore::open(&paths_a.container(VAULT), PASSWORD).unwrap();
    let vb = VaultStore::open(&paths_b.container(VAULT), PASSWORD).unwrap();
    assert_eq!(va.vault().groups, vb.vault().groups);
    assert_eq!(va.vault().entries, vb.vault().entries);
}

#[test]
fn rename_on_one_replica_and_add_on_the_other_converge() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    add_entry(&paths_a, "Mail");
    let a = SyncOrchestrator::new(&gateway, paths_a.clone(), "k2");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&remote()).unwrap();

    let mut store = VaultStore::open(&paths_a.container(VAULT), PASSWORD).unwrap();
    let mail = *store.vault().entries.keys().next().unwrap();
    store
        .vault_mut()
        .set_field(mail, model::TITLE, FieldValue::plain("Webmail"))
        .unwrap();
    store.save().unwrap();
    add_entry(&paths_b, "Bank");

    a.sync(VAULT, PASSWORD).unwrap();
    b.sync(VAULT, PASSWORD).unwrap();
    a.sync(VAULT, PASSWORD).unwrap();

    assert_eq!(titles(&paths_a), vec!["Bank", "Webmail"]);
    assert_eq!(titles(&paths_b), titles(&paths_a));

    let va = VaultStore::open(&paths_a.container(VAULT), PASSWORD).unwrap();
    let vb = VaultStore::open(&paths_b.container(VAULT), PASSWORD).unwrap();
    assert_eq!(va.vault().groups, vb.vault().groups);
    assert_eq!(va.vault().entries, vb.vault().entries);
    assert_eq!(va.vault().entry(&mail).unwrap().title(), "Webmail");
}

#[test]
fn deletion_reaches_the_other_replica() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    add_entry(&paths_a, "old");
    let a = SyncOrchestrator::new(&gateway, paths_a.clone(), "k2");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&remote()).unwrap();

    let mut store = VaultStore::open(&paths_a.container(VAULT), PASSWORD).unwrap();
    let old = *store.vault().entries.keys().next().unwrap();
    store.vault_mut().delete_entry(old).unwrap();
    store.save().unwrap();

    a.sync(VAULT, PASSWORD).unwrap();
    b.sync(VAULT, PASSWORD).unwrap();

    assert!(titles(&paths_b).is_empty());
}

#[test]
fn remote_with_other_kdf_parameters_is_unlocked_with_the_same_password() {
    let gateway = MemoryStore::new();
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let orchestrator = SyncOrchestrator::new(&gateway, paths.clone(), "k2");
    orchestrator.sync(VAULT, PASSWORD).unwrap();

    // Re-key the remote copy under fresh KDF parameters, same password.
    let mut remote_vault = VaultStore::open(&paths.container(VAULT), PASSWORD)
        .unwrap()
        .vault()
        .clone();
    let root = remote_vault.root;
    let e = remote_vault.create_entry(root).unwrap();
    remote_vault
        .set_field(e, model::TITLE, FieldValue::plain("rekeyed"))
        .unwrap();
    remote_vault.kdf = KdfParams::generate(&cheap_cost()).unwrap();
    let creds = derive_key(PASSWORD, &remote_vault.kdf).unwrap();
    gateway
        .put(
            "team-bucket",
            "k2/vault1/vault1.k2db",
            &encrypt_container(&remote_vault, &creds).unwrap(),
            &ObjectTags::container(),
        )
        .unwrap();

    orchestrator.sync(VAULT, PASSWORD).unwrap();
    assert_eq!(titles(&paths), vec!["rekeyed"]);
}

#[test]
fn unreadable_edit_state_falls_back_to_a_full_merge() {
    let gateway = MemoryStore::new();
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let orchestrator = SyncOrchestrator::new(&gateway, paths.clone(), "k2");
    orchestrator.sync(VAULT, PASSWORD).unwrap();

    let mut store = VaultStore::open(&paths.container(VAULT), PASSWORD).unwrap();
    store.vault_mut().edit_state = Some("%%% not base64 %%%".into());
    store.save().unwrap();
    add_entry(&paths, "kept");

    let outcome = orchestrator.sync(VAULT, PASSWORD).unwrap();
    assert!(outcome.report.is_some());
    assert_eq!(titles(&paths), vec!["kept"]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn wrong_password_aborts_at_unlock_local() {
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let gateway = MemoryStore::new();
    let orchestrator = SyncOrchestrator::new(&gateway, paths, "k2");

    let err = orchestrator.sync(VAULT, b"wrong-password").unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::UnlockLocal));
    assert!(matches!(err.root(), KtwoError::AuthenticationFailed));
    assert!(err.to_string().contains("unlock-local"));
    assert!(gateway.is_empty());
}

#[test]
fn remote_under_another_password_aborts_at_unlock_remote() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let a = SyncOrchestrator::new(&gateway, new_machine(&dir_a, Some(BUCKET)), "k2");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    VaultStore::create(&paths_b.container(VAULT), VAULT, b"0therPass", &cheap_cost()).unwrap();
    SyncConfig::new(VAULT, Some(BUCKET))
        .save(&paths_b.sidecar(VAULT))
        .unwrap();
    let b = SyncOrchestrator::new(&gateway, paths_b, "k2");

    let err = b.sync(VAULT, b"0therPass").unwrap_err();
    assert_eq!(err.stage(), Some(SyncStage::UnlockRemote));
    assert!(matches!(err.root(), KtwoError::AuthenticationFailed));
}

#[test]
fn unreachable_remote_aborts_at_fetch_and_leaves_local_alone() {
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let before = std::fs::read(paths.container(VAULT)).unwrap();
    let gateway = MemoryStore::new();
    gateway.set_offline(true);
    let orchestrator = SyncOrchestrator::new(&gateway, paths.clone(), "k2");

    let err = orchestrator.sync(VAULT, PASSWORD).unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::FetchRemote));
    assert!(matches!(err.root(), KtwoError::RemoteUnavailable(_)));
    assert_eq!(std::fs::read(paths.container(VAULT)).unwrap(), before);
}

/// Reads from a memory store, refuses every write.
struct ReadOnly<'a>(&'a MemoryStore);

impl BlobStore for ReadOnly<'_> {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.0.get(bucket, key)
    }

    fn put(&self, bucket: &str, key: &str, _: &[u8], _: &ObjectTags) -> Result<()> {
        Err(KtwoError::RemoteUnavailable(format!("{bucket}/{key}: read-only")))
    }
}

#[test]
fn failed_push_keeps_the_merged_local_vault() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    SyncOrchestrator::new(&gateway, paths_a.clone(), "k2")
        .sync(VAULT, PASSWORD)
        .unwrap();
    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&remote()).unwrap();
    add_entry(&paths_b, "from-b");
    b.sync(VAULT, PASSWORD).unwrap();

    add_entry(&paths_a, "from-a");
    let read_only = ReadOnly(&gateway);
    let err = SyncOrchestrator::new(&read_only, paths_a.clone(), "k2")
        .sync(VAULT, PASSWORD)
        .unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::PushRemote));
    assert_eq!(titles(&paths_a), vec!["from-a", "from-b"]);
}

#[test]
fn sync_without_a_bucket_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, None);
    let gateway = MemoryStore::new();

    let err = SyncOrchestrator::new(&gateway, paths, "k2")
        .sync(VAULT, PASSWORD)
        .unwrap_err();
    assert!(matches!(err, KtwoError::Config(_)));
}

// ---------------------------------------------------------------------------
// Pull and publish
// ---------------------------------------------------------------------------

#[test]
fn pull_refuses_to_overwrite_a_local_vault() {
    let gateway = MemoryStore::new();
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let orchestrator = SyncOrchestrator::new(&gateway, paths, "k2");
    orchestrator.sync(VAULT, PASSWORD).unwrap();

    assert!(matches!(
        orchestrator.pull(&remote()),
        Err(KtwoError::AlreadyExists(_))
    ));
}

#[test]
fn pull_of_a_missing_vault_is_remote_unavailable() {
    let gateway = MemoryStore::new();
    let dir = TempDir::new().unwrap();
    let orchestrator = SyncOrchestrator::new(&gateway, VaultPaths::new(dir.path()), "k2");

    let err = orchestrator.pull(&remote()).unwrap_err();
    assert_eq!(err.stage(), Some(SyncStage::FetchRemote));
    assert!(matches!(err.root(), KtwoError::RemoteUnavailable(_)));
    assert!(!dir.path().join("vault1.k2db").exists());
}

#[test]
fn pulled_copy_opens_with_the_same_password() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let paths_a = new_machine(&dir_a, Some(BUCKET));
    add_entry(&paths_a, "shared");
    SyncOrchestrator::new(&gateway, paths_a, "k2")
        .sync(VAULT, PASSWORD)
        .unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    SyncOrchestrator::new(&gateway, paths_b.clone(), "k2")
        .pull(&remote())
        .unwrap();

    assert_eq!(titles(&paths_b), vec!["shared"]);
    let config = SyncConfig::load(&paths_b.sidecar(VAULT), VAULT).unwrap();
    assert_eq!(config.bucket(), Some(BUCKET));
}

#[test]
fn publish_pushes_only_when_a_bucket_is_configured() {
    let gateway = MemoryStore::new();

    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, None);
    let orchestrator = SyncOrchestrator::new(&gateway, paths.clone(), "k2");
    let mut store = VaultStore::open(&paths.container(VAULT), PASSWORD).unwrap();
    let config = SyncConfig::load(&paths.sidecar(VAULT), VAULT).unwrap();
    assert!(orchestrator
        .publish(&mut store, &config, PASSWORD)
        .unwrap()
        .is_none());
    assert!(gateway.is_empty());

    let config = SyncConfig::new(VAULT, Some(BUCKET));
    let outcome = orchestrator
        .publish(&mut store, &config, PASSWORD)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.remote, remote());
    assert_eq!(gateway.len(), 2);
}

#[test]
fn publish_from_a_stale_replica_keeps_entries_synced_elsewhere() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    let a = SyncOrchestrator::new(&gateway, paths_a.clone(), "k2");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&remote()).unwrap();
    add_entry(&paths_b, "from-b");
    b.sync(VAULT, PASSWORD).unwrap();

    // A has not synced since B pushed; it adds and publishes.
    let mut store = VaultStore::open(&paths_a.container(VAULT), PASSWORD).unwrap();
    let root = store.vault().root;
    let e = store.vault_mut().create_entry(root).unwrap();
    store
        .vault_mut()
        .set_field(e, model::TITLE, FieldValue::plain("from-a"))
        .unwrap();
    let config = SyncConfig::load(&paths_a.sidecar(VAULT), VAULT).unwrap();
    let outcome = a
        .publish(&mut store, &config, PASSWORD)
        .unwrap()
        .unwrap();
    assert!(outcome.report.is_some());
    assert_eq!(titles(&paths_a), vec!["from-a", "from-b"]);

    b.sync(VAULT, PASSWORD).unwrap();
    a.sync(VAULT, PASSWORD).unwrap();
    assert_eq!(titles(&paths_b), vec!["from-a", "from-b"]);
    assert_eq!(titles(&paths_a), vec!["from-a", "from-b"]);
}

#[test]
fn publish_saves_locally_even_when_the_remote_is_unreachable() {
    let gateway = MemoryStore::new();
    let dir = TempDir::new().unwrap();
    let paths = new_machine(&dir, Some(BUCKET));
    let orchestrator = SyncOrchestrator::new(&gateway, paths.clone(), "k2");

    let mut store = VaultStore::open(&paths.container(VAULT), PASSWORD).unwrap();
    let root = store.vault().root;
    let e = store.vault_mut().create_entry(root).unwrap();
    store
        .vault_mut()
        .set_field(e, model::TITLE, FieldValue::plain("offline"))
        .unwrap();
    let config = SyncConfig::load(&paths.sidecar(VAULT), VAULT).unwrap();

    gateway.set_offline(true);
    let err = orchestrator
        .publish(&mut store, &config, PASSWORD)
        .unwrap_err();

    assert_eq!(err.stage(), Some(SyncStage::FetchRemote));
    assert_eq!(titles(&paths), vec!["offline"]);
}

#[test]
fn pulled_vault_keeps_syncing_under_the_prefix_it_came_from() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let paths_a = new_machine(&dir_a, Some(BUCKET));
    let a = SyncOrchestrator::new(&gateway, paths_a.clone(), "team");
    a.sync(VAULT, PASSWORD).unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    let b = SyncOrchestrator::new(&gateway, paths_b.clone(), "k2");
    b.pull(&RemoteRef::parse("s3://team-bucket/team/vault1").unwrap())
        .unwrap();
    let config = SyncConfig::load(&paths_b.sidecar(VAULT), VAULT).unwrap();
    assert_eq!(config.remote_prefix.as_deref(), Some("team"));

    add_entry(&paths_b, "from-b");
    let outcome = b.sync(VAULT, PASSWORD).unwrap();
    assert!(outcome.report.is_some());
    assert_eq!(outcome.remote.to_string(), "s3://team-bucket/team/vault1");
    assert_eq!(gateway.len(), 2);

    a.sync(VAULT, PASSWORD).unwrap();
    assert_eq!(titles(&paths_a), vec!["from-b"]);
}

#[test]
fn pull_under_the_default_prefix_records_no_override() {
    let gateway = MemoryStore::new();
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    SyncOrchestrator::new(&gateway, new_machine(&dir_a, Some(BUCKET)), "k2")
        .sync(VAULT, PASSWORD)
        .unwrap();

    let paths_b = VaultPaths::new(dir_b.path());
    SyncOrchestrator::new(&gateway, paths_b.clone(), "k2")
        .pull(&remote())
        .unwrap();

    let config = SyncConfig::load(&paths_b.sidecar(VAULT), VAULT).unwrap();
    assert_eq!(config.remote_prefix, None);
}
