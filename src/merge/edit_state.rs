//! Edit-state snapshots: what both replicas agreed on at the last sync.
//!
//! A snapshot records, per live group and entry, the timestamps and
//! parent it had when the sync completed. The merge engine compares
//! each side against it to tell "changed here" from "changed there".
//! On disk it is an opaque base64 string stored inside the vault.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{KtwoError, Result};
use crate::vault::model::{Timestamp, Vault};

const EDIT_STATE_VERSION: u32 = 1;

/// Snapshot of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub last_modified: Timestamp,
    pub location_changed: Timestamp,
    pub parent: Option<Uuid>,
}

/// Structural fingerprint of a vault at the end of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditState {
    version: u32,
    pub root: Option<Uuid>,
    pub groups: BTreeMap<Uuid, EntityState>,
    pub entries: BTreeMap<Uuid, EntityState>,
}

impl EditState {
    /// The state of a vault that has never been synced.
    pub fn empty() -> Self {
        Self {
            version: EDIT_STATE_VERSION,
            ..Self::default()
        }
    }

    /// Fingerprint every live node of `vault`.
    pub fn capture(vault: &Vault) -> Self {
        Self {
            version: EDIT_STATE_VERSION,
            root: Some(vault.root),
            groups: vault
                .groups
                .values()
                .map(|g| {
                    (
                        g.uuid,
                        EntityState {
                            last_modified: g.times.last_modified,
                            location_changed: g.times.location_changed,
                            parent: g.parent,
                        },
                    )
                })
                .collect(),
            entries: vault
                .entries
                .values()
                .map(|e| {
                    (
                        e.uuid,
                        EntityState {
                            last_modified: e.times.last_modified,
                            location_changed: e.times.location_changed,
                            parent: Some(e.parent),
                        },
                    )
                })
                .collect(),
        }
    }

    /// The edit state stored in `vault`, or an empty one if it has none.
    pub fn of(vault: &Vault) -> Result<Self> {
        match &vault.edit_state {
            Some(blob) => Self::decode(blob),
            None => Ok(Self::empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.entries.is_empty()
    }

    /// Serialize to the opaque string stored in the vault.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| KtwoError::Serialization(format!("edit state: {e}")))?;
        Ok(BASE64.encode(json))
    }

    /// Parse an opaque edit-state string.
    pub fn decode(blob: &str) -> Result<Self> {
        let json = BASE64
            .decode(blob.trim())
            .map_err(|e| KtwoError::MalformedEditState(format!("not base64: {e}")))?;
        let state: EditState = serde_json::from_slice(&json)
            .map_err(|e| KtwoError::MalformedEditState(e.to_string()))?;
        if state.version != EDIT_STATE_VERSION {
            return Err(KtwoError::MalformedEditState(format!(
                "unsupported version {}",
                state.version
            )));
        }
        Ok(state)
    }
}
