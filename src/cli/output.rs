//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;

use crate::merge::MergeReport;
use crate::vault::model::{Entry, Group};

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

const MASK: &str = "********";

/// Print a table of entries (Group, Title, UserName, Password, URL, Notes).
///
/// Passwords are masked unless `show_passwords` is set.
pub fn print_entries_table(rows: &[(&Group, &Entry)], show_passwords: bool) {
    if rows.is_empty() {
        info("No matching entries.");
        tip("Run `k2 add <vault> -t <title>` to add one.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Group", "Title", "UserName", "Password", "URL", "Notes"]);

    for (group, entry) in rows {
        let password = if show_passwords {
            entry.password().to_string()
        } else if entry.password().is_empty() {
            String::new()
        } else {
            MASK.to_string()
        };
        table.add_row(vec![
            group.name.clone(),
            entry.title().to_string(),
            entry.user_name().to_string(),
            password,
            entry.url().to_string(),
            entry.notes().to_string(),
        ]);
    }

    println!("{table}");
}

/// Summarize what a merge did.
pub fn print_merge_report(report: &MergeReport) {
    info(&format!(
        "{} change(s) taken from remote, {} deletion(s) applied",
        report.from_remote, report.deleted
    ));
    for conflict in &report.conflicts {
        warning(&conflict.to_string());
    }
}
