//! `k2 remove` — delete entries by title.

use crate::cli::output;
use crate::cli::{load_context, open_gateway, prompt_password};
use crate::config::paths::validate_vault_name;
use crate::config::SyncConfig;
use crate::errors::{KtwoError, Result};
use crate::sync::SyncOrchestrator;
use crate::vault::VaultStore;

/// Execute the `remove` command.
pub fn execute(vault: &str, title: &str, group: Option<&str>) -> Result<()> {
    validate_vault_name(vault)?;
    let (paths, settings) = load_context()?;

    let password = prompt_password("Enter the vault password")?;
    let mut store = VaultStore::open(&paths.container(vault), password.as_bytes())?;

    let doomed: Vec<_> = store
        .vault()
        .walk()
        .into_iter()
        .filter(|(g, e)| e.title() == title && group.map_or(true, |name| g.name == name))
        .map(|(_, e)| e.uuid)
        .collect();
    if doomed.is_empty() {
        return Err(KtwoError::EntryNotFound(title.to_string()));
    }
    for uuid in &doomed {
        store.vault_mut().delete_entry(*uuid)?;
    }

    let config = SyncConfig::load(&paths.sidecar(vault), vault)?;
    let gateway = open_gateway(&settings, &paths)?;
    let orchestrator = SyncOrchestrator::new(&*gateway, paths.clone(), &settings.remote_prefix);

    match orchestrator.publish(&mut store, &config, password.as_bytes()) {
        Ok(Some(outcome)) => {
            if let Some(report) = &outcome.report {
                output::print_merge_report(report);
            }
        }
        Ok(None) => {}
        Err(e) if e.stage().is_some() => {
            output::warning(&format!("{e}"));
            output::tip(&format!("Run `k2 sync {vault}` to retry the upload."));
        }
        Err(e) => return Err(e),
    }

    output::success(&format!("Removed {} entr(ies) titled '{title}'", doomed.len()));
    Ok(())
}
