//! Configuration : global settings, per-vault sidecars and file layout.

pub mod paths;
pub mod settings;
pub mod sidecar;

pub use paths::VaultPaths;
pub use settings::Settings;
pub use sidecar::SyncConfig;
