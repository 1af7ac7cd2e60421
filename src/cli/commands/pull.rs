//! `k2 pull` — fetch a vault and its sidecar from remote storage.

use crate::cli::output;
use crate::cli::{load_context, open_gateway};
use crate::config::paths::validate_vault_name;
use crate::errors::Result;
use crate::sync::{RemoteRef, SyncOrchestrator};

/// Execute the `pull` command.
pub fn execute(remote: &str) -> Result<()> {
    let remote = RemoteRef::parse(remote)?;
    validate_vault_name(&remote.name)?;
    let (paths, settings) = load_context()?;

    let gateway = open_gateway(&settings, &paths)?;
    let orchestrator = SyncOrchestrator::new(&*gateway, paths, &settings.remote_prefix);

    output::info(&format!("Pulling vault and config from {remote}"));
    let path = orchestrator.pull(&remote)?;
    output::success(&format!("Vault written to {}", path.display()));
    output::tip(&format!("Run `k2 sync {}` to keep it up to date.", remote.name));

    Ok(())
}
