//! `k2 sync` — merge with the remote copy and push the result.

use crate::cli::output;
use crate::cli::{load_context, open_gateway, prompt_password};
use crate::config::paths::validate_vault_name;
use crate::errors::Result;
use crate::sync::SyncOrchestrator;

/// Execute the `sync` command.
pub fn execute(vault: &str) -> Result<()> {
    validate_vault_name(vault)?;
    let (paths, settings) = load_context()?;

    let gateway = open_gateway(&settings, &paths)?;
    let orchestrator = SyncOrchestrator::new(&*gateway, paths, &settings.remote_prefix);

    let password = prompt_password("Enter the vault password")?;
    let outcome = orchestrator.sync(vault, password.as_bytes())?;

    match &outcome.report {
        Some(report) => output::print_merge_report(report),
        None => output::info("No remote copy yet; published the local vault."),
    }
    output::success(&format!(
        "Vault '{vault}' synced with {} ({} entries)",
        outcome.remote, outcome.entries
    ));

    Ok(())
}
