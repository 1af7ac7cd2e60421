//! `k2 newdb` — create a new vault and its sync sidecar.

use crate::cli::output;
use crate::cli::{load_context, prompt_new_password};
use crate::config::paths::validate_vault_name;
use crate::config::SyncConfig;
use crate::errors::{KtwoError, Result};
use crate::vault::VaultStore;

/// Execute the `newdb` command.
pub fn execute(vault: &str, bucket: Option<&str>) -> Result<()> {
    validate_vault_name(vault)?;
    let (paths, settings) = load_context()?;

    let container = paths.container(vault);
    let sidecar = paths.sidecar(vault);
    if container.exists() {
        output::tip(&format!("Use `k2 add {vault}` to add entries to it."));
        return Err(KtwoError::AlreadyExists(container));
    }

    let config = SyncConfig::new(vault, bucket);
    if let Some(bucket) = config.bucket() {
        crate::sync::RemoteRef::for_vault(bucket, &settings.remote_prefix, vault)?;
    }

    let password = prompt_new_password()?;
    VaultStore::create(&container, vault, password.as_bytes(), &settings.kdf_cost())?;
    config.save(&sidecar)?;

    output::success(&format!("Vault '{vault}' created at {}", container.display()));
    match config.bucket() {
        Some(bucket) => output::tip(&format!(
            "Run `k2 sync {vault}` to publish it to {bucket}."
        )),
        None => output::tip(&format!("Run `k2 add {vault} -t <title>` to add an entry.")),
    }

    Ok(())
}
