//! Serialization of the vault tree to bytes and back, independent of
//! encryption.
//!
//! The payload is a JSON document. Each object keeps any keys it does
//! not recognize in an `extra` map (via `#[serde(flatten)]`) and writes
//! them back unchanged, so a vault touched by a newer writer survives a
//! round trip through this one.
//!
//! Protected values are revealed only here, into wire structs whose
//! strings are zeroed when dropped. The encoded buffer is zeroed on drop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::model::{Entry, EntryFields, Extra, FieldValue, Group, Times, Timestamp, Vault};
use crate::crypto::KdfParams;
use crate::errors::{KtwoError, Result};

/// Version of the payload layout.
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct WireVault {
    payload_version: u32,
    name: String,
    created_at: Timestamp,
    modified_at: Timestamp,
    root: Uuid,
    groups: Vec<WireGroup>,
    entries: Vec<WireEntry>,
    #[serde(default)]
    deleted: Vec<WireDeleted>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edit_state: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Serialize, Deserialize)]
struct WireGroup {
    uuid: Uuid,
    name: String,
    #[serde(default)]
    parent: Option<Uuid>,
    #[serde(default)]
    groups: Vec<Uuid>,
    #[serde(default)]
    entries: Vec<Uuid>,
    times: Times,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    uuid: Uuid,
    parent: Uuid,
    fields: Vec<WireField>,
    times: Times,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Serialize, Deserialize)]
struct WireField {
    name: String,
    value: String,
    #[serde(default)]
    protected: bool,
}

impl Drop for WireField {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[derive(Serialize, Deserialize)]
struct WireDeleted {
    uuid: Uuid,
    deleted_at: Timestamp,
}

/// Serialize a vault tree. The KDF parameters are not part of the
/// payload; they travel in the container header.
pub fn encode(vault: &Vault) -> Result<Zeroizing<Vec<u8>>> {
    let wire = WireVault {
        payload_version: PAYLOAD_VERSION,
        name: vault.name.clone(),
        created_at: vault.created_at,
        modified_at: vault.modified_at,
        root: vault.root,
        groups: vault.groups.values().map(group_to_wire).collect(),
        entries: vault.entries.values().map(entry_to_wire).collect(),
        deleted: vault
            .deleted
            .iter()
            .map(|(uuid, deleted_at)| WireDeleted {
                uuid: *uuid,
                deleted_at: *deleted_at,
            })
            .collect(),
        edit_state: vault.edit_state.clone(),
        extra: vault.extra.clone(),
    };

    serde_json::to_vec(&wire)
        .map(Zeroizing::new)
        .map_err(|e| KtwoError::Serialization(format!("vault payload: {e}")))
}

/// Deserialize a vault tree and check its structure.
pub fn decode(bytes: &[u8], kdf: KdfParams) -> Result<Vault> {
    let wire: WireVault = serde_json::from_slice(bytes)
        .map_err(|e| KtwoError::InvalidContainer(format!("vault payload: {e}")))?;

    let groups: BTreeMap<Uuid, Group> = wire
        .groups
        .into_iter()
        .map(|g| {
            (
                g.uuid,
                Group {
                    uuid: g.uuid,
                    name: g.name,
                    parent: g.parent,
                    groups: g.groups,
                    entries: g.entries,
                    times: g.times,
                    extra: g.extra,
                },
            )
        })
        .collect();

    let entries: BTreeMap<Uuid, Entry> = wire
        .entries
        .into_iter()
        .map(|e| (e.uuid, entry_from_wire(e)))
        .collect();

    let vault = Vault {
        name: wire.name,
        kdf,
        created_at: wire.created_at,
        modified_at: wire.modified_at,
        root: wire.root,
        groups,
        entries,
        deleted: wire
            .deleted
            .into_iter()
            .map(|d| (d.uuid, d.deleted_at))
            .collect(),
        edit_state: wire.edit_state,
        extra: wire.extra,
        header_extra: Extra::new(),
    };
    vault.validate()?;
    Ok(vault)
}

fn group_to_wire(g: &Group) -> WireGroup {
    WireGroup {
        uuid: g.uuid,
        name: g.name.clone(),
        parent: g.parent,
        groups: g.groups.clone(),
        entries: g.entries.clone(),
        times: g.times,
        extra: g.extra.clone(),
    }
}

fn entry_to_wire(e: &Entry) -> WireEntry {
    WireEntry {
        uuid: e.uuid,
        parent: e.parent,
        fields: e
            .fields
            .iter()
            .map(|(name, value)| WireField {
                name: name.to_string(),
                value: value.reveal().to_string(),
                protected: value.is_protected(),
            })
            .collect(),
        times: e.times,
        extra: e.extra.clone(),
    }
}

fn entry_from_wire(e: WireEntry) -> Entry {
    let mut fields = EntryFields::default();
    for f in &e.fields {
        let value = if f.protected {
            FieldValue::protected(&f.value)
        } else {
            FieldValue::plain(f.value.as_str())
        };
        fields.set(f.name.as_str(), value);
    }
    Entry {
        uuid: e.uuid,
        parent: e.parent,
        fields,
        times: e.times,
        extra: e.extra,
    }
}
