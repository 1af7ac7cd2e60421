//! `k2 list` — display entries in a table.

use crate::cli::output;
use crate::cli::{load_context, prompt_password};
use crate::config::paths::validate_vault_name;
use crate::errors::Result;
use crate::vault::VaultStore;

/// Execute the `list` command.
pub fn execute(
    vault: &str,
    group: Option<&str>,
    title: Option<&str>,
    show_passwords: bool,
) -> Result<()> {
    validate_vault_name(vault)?;
    let (paths, _) = load_context()?;

    let password = prompt_password("Enter the vault password")?;
    let store = VaultStore::open(&paths.container(vault), password.as_bytes())?;

    let tree = store.vault();
    let rows: Vec<_> = tree
        .walk()
        .into_iter()
        .filter(|(g, _)| group.map_or(true, |name| g.name == name))
        .filter(|(_, e)| title.map_or(true, |t| e.title() == t))
        .collect();

    output::info(&format!("{vault}: {} entr(ies)", rows.len()));
    output::print_entries_table(&rows, show_passwords);

    Ok(())
}
