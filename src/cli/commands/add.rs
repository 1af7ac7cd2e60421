//! `k2 add` — add an entry, generating its password unless asked not to.

use crate::cli::generator::generate_password;
use crate::cli::output;
use crate::cli::{ask_non_empty, load_context, open_gateway, prompt_password};
use crate::config::paths::validate_vault_name;
use crate::config::SyncConfig;
use crate::errors::Result;
use crate::sync::SyncOrchestrator;
use crate::vault::model::{self, FieldValue};
use crate::vault::VaultStore;

/// Name that selects the vault's default group.
const DEFAULT_GROUP: &str = "default";

/// Entry fields given on the command line.
pub struct NewEntry<'a> {
    pub group: &'a str,
    pub title: Option<&'a str>,
    pub user: Option<&'a str>,
    pub url: Option<&'a str>,
    pub note: Option<&'a str>,
    pub askpass: bool,
}

/// Execute the `add` command.
pub fn execute(vault: &str, new: &NewEntry<'_>) -> Result<()> {
    validate_vault_name(vault)?;
    let (paths, settings) = load_context()?;

    let password = prompt_password("Enter the vault password")?;
    let mut store = VaultStore::open(&paths.container(vault), password.as_bytes())?;

    let entry_password = if new.askpass {
        ask_non_empty("Enter a password for the entry")?
    } else {
        generate_password(settings.password_length)?
    };

    let tree = store.vault_mut();
    let group = if new.group == DEFAULT_GROUP {
        tree.root
    } else {
        match tree.find_group_by_name(new.group).map(|g| g.uuid) {
            Some(uuid) => uuid,
            None => {
                output::info(&format!("Creating group '{}'", new.group));
                tree.create_group(tree.root, new.group)?
            }
        }
    };

    let entry = tree.create_entry(group)?;
    for (name, value) in [
        (model::TITLE, new.title),
        (model::USER_NAME, new.user),
        (model::URL, new.url),
        (model::NOTES, new.note),
    ] {
        if let Some(value) = value {
            tree.set_field(entry, name, FieldValue::plain(value))?;
        }
    }
    tree.set_field(entry, model::PASSWORD, FieldValue::protected(&entry_password))?;

    let config = SyncConfig::load(&paths.sidecar(vault), vault)?;
    let gateway = open_gateway(&settings, &paths)?;
    let orchestrator = SyncOrchestrator::new(&*gateway, paths.clone(), &settings.remote_prefix);

    match orchestrator.publish(&mut store, &config, password.as_bytes()) {
        Ok(Some(outcome)) => {
            if let Some(report) = &outcome.report {
                output::print_merge_report(report);
            }
            output::success(&format!("Entry added, vault synced with {}.", outcome.remote));
        }
        Ok(None) => output::success("Entry added and vault saved."),
        Err(e) if e.stage().is_some() => {
            output::success("Entry added and vault saved.");
            output::warning(&format!("{e}"));
            output::tip(&format!("Run `k2 sync {vault}` to retry the upload."));
        }
        Err(e) => return Err(e),
    }

    let tree = store.vault();
    let rows: Vec<_> = tree
        .walk()
        .into_iter()
        .filter(|(_, e)| e.uuid == entry)
        .collect();
    output::print_entries_table(&rows, false);

    Ok(())
}
