use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncStage;

/// All errors that can occur in ktwo.
///
/// Messages never include field values or passwords.
#[derive(Debug, Error)]
pub enum KtwoError {
    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong password, or a corrupted/tampered container. The two cases
    /// are indistinguishable.
    #[error("Authentication failed — wrong password or corrupted container")]
    AuthenticationFailed,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    // --- Vault errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    #[error("Entry '{0}' not found")]
    EntryNotFound(String),

    // --- Merge errors ---
    #[error("Malformed edit state: {0}")]
    MalformedEditState(String),

    // --- Remote errors ---
    #[error("Remote storage unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Sync aborted during {stage}: {source}")]
    SyncAborted {
        stage: SyncStage,
        #[source]
        source: Box<KtwoError>,
    },

    // --- Config errors ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    Serialization(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,
}

impl KtwoError {
    /// Attach the pipeline stage that produced this error.
    pub fn at(self, stage: SyncStage) -> Self {
        KtwoError::SyncAborted {
            stage,
            source: Box::new(self),
        }
    }

    /// The underlying error, with any stage wrappers removed.
    pub fn root(&self) -> &KtwoError {
        match self {
            KtwoError::SyncAborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// The pipeline stage this error was raised in, if any.
    pub fn stage(&self) -> Option<SyncStage> {
        match self {
            KtwoError::SyncAborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Convenience type alias for ktwo results.
pub type Result<T> = std::result::Result<T, KtwoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_names_the_stage_and_keeps_the_root() {
        let err = KtwoError::AuthenticationFailed.at(SyncStage::UnlockRemote);
        assert!(err.to_string().contains("unlock-remote"));
        assert!(matches!(err.root(), KtwoError::AuthenticationFailed));
        assert_eq!(err.stage(), Some(SyncStage::UnlockRemote));
    }

    #[test]
    fn authentication_message_is_generic() {
        let msg = KtwoError::AuthenticationFailed.to_string();
        assert!(msg.contains("wrong password or corrupted"));
    }
}
