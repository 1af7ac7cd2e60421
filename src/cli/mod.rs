//! CLI module — Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod generator;
pub mod output;

use clap::Parser;

use zeroize::Zeroizing;

use crate::config::{Settings, VaultPaths};
use crate::errors::{KtwoError, Result};
use crate::sync::{BlobStore, DirectoryStore};

/// Environment variable holding the vault password for scripted use.
pub const PASSWORD_ENV: &str = "K2_PASSWORD";

/// Minimum password length for new vaults.
const MIN_PASSWORD_LEN: usize = 8;

/// How many times an empty password is re-prompted before giving up.
const PROMPT_ATTEMPTS: usize = 3;

/// k2: encrypted credential vault with remote sync.
#[derive(Parser)]
#[command(
    name = "k2",
    about = "Encrypted credential vault with three-way remote sync",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v info, -vv debug). KTWO_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new vault
    #[command(alias = "n")]
    Newdb {
        /// Vault name
        vault: String,
        /// Remote bucket to sync to (e.g. s3://my-bucket)
        #[arg(short = 's', long)]
        bucket: Option<String>,
    },

    /// Add an entry with a generated password
    #[command(alias = "a")]
    Add {
        /// Vault name
        vault: String,
        /// Group to add the entry to (created if missing)
        #[arg(short, long, default_value = "default")]
        group: String,
        /// Entry title
        #[arg(short, long)]
        title: Option<String>,
        /// Entry user name
        #[arg(short, long)]
        user: Option<String>,
        /// Entry URL
        #[arg(long)]
        url: Option<String>,
        /// Entry note
        #[arg(short, long)]
        note: Option<String>,
        /// Prompt for the entry password instead of generating one
        #[arg(short, long)]
        askpass: bool,
    },

    /// List entries
    #[command(alias = "l")]
    List {
        /// Vault name
        vault: String,
        /// Only entries in this group
        #[arg(short, long)]
        group: Option<String>,
        /// Only entries with this title
        #[arg(short, long)]
        title: Option<String>,
        /// Print passwords in clear text
        #[arg(long)]
        show_passwords: bool,
    },

    /// Download a vault from remote storage (e.g. s3://my-bucket/k2/vault1)
    Pull {
        /// Remote reference
        remote: String,
    },

    /// Merge with the remote copy and push the result
    #[command(alias = "s")]
    Sync {
        /// Vault name
        vault: String,
    },

    /// Delete entries by title
    #[command(alias = "rm")]
    Remove {
        /// Vault name
        vault: String,
        /// Title of the entries to delete
        #[arg(short, long)]
        title: String,
        /// Only delete entries in this group
        #[arg(short, long)]
        group: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Get the vault password, trying in order:
/// 1. `K2_PASSWORD` env var (scripts)
/// 2. Interactive prompt, re-asked a few times if left empty
///
/// Returns `Zeroizing<String>` so the password is wiped from memory on drop.
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env() {
        return Ok(pw);
    }
    ask_non_empty(prompt)
}

/// Prompt for a new password with confirmation (used by `newdb`).
///
/// Also respects `K2_PASSWORD`. Enforces a minimum password length.
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env() {
        if pw.len() < MIN_PASSWORD_LEN {
            return Err(KtwoError::CommandFailed(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        return Ok(pw);
    }

    for _ in 0..PROMPT_ATTEMPTS {
        let password = Zeroizing::new(
            dialoguer::Password::new()
                .with_prompt("Choose vault password")
                .with_confirmation(
                    "Confirm vault password",
                    "Passwords do not match, try again",
                )
                .allow_empty_password(true)
                .interact()
                .map_err(|e| KtwoError::CommandFailed(format!("password prompt: {e}")))?,
        );

        if password.len() < MIN_PASSWORD_LEN {
            output::warning(&format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(password);
    }

    Err(KtwoError::UserCancelled)
}

/// Masked prompt that rejects empty input, a bounded number of times.
pub fn ask_non_empty(prompt: &str) -> Result<Zeroizing<String>> {
    for _ in 0..PROMPT_ATTEMPTS {
        let pw = Zeroizing::new(
            dialoguer::Password::new()
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map_err(|e| KtwoError::CommandFailed(format!("password prompt: {e}")))?,
        );
        if !pw.is_empty() {
            return Ok(pw);
        }
        output::warning("Please enter your password.");
    }
    Err(KtwoError::UserCancelled)
}

fn password_from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

/// Resolve the config root and load its settings.
pub fn load_context() -> Result<(VaultPaths, Settings)> {
    let paths = VaultPaths::from_env()?;
    let settings = Settings::load(paths.root())?;
    Ok((paths, settings))
}

/// Build the storage gateway named by the settings.
///
/// Defaults to a directory under the config root. `http://` and
/// `https://` endpoints need the `http-store` feature.
pub fn open_gateway(settings: &Settings, paths: &VaultPaths) -> Result<Box<dyn BlobStore>> {
    match settings.remote_endpoint.as_deref() {
        None => Ok(Box::new(DirectoryStore::new(paths.remote_dir()))),
        Some(endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {
            http_gateway(endpoint)
        }
        Some(dir) => Ok(Box::new(DirectoryStore::new(dir))),
    }
}

#[cfg(feature = "http-store")]
fn http_gateway(endpoint: &str) -> Result<Box<dyn BlobStore>> {
    Ok(Box::new(crate::sync::gateway::HttpStore::new(endpoint)))
}

#[cfg(not(feature = "http-store"))]
fn http_gateway(endpoint: &str) -> Result<Box<dyn BlobStore>> {
    Err(KtwoError::Config(format!(
        "remote endpoint {endpoint} needs a build with the `http-store` feature"
    )))
}
