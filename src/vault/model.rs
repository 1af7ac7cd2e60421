//! The in-memory vault tree: groups, entries, fields and tombstones.
//!
//! Groups and entries live in UUID-keyed maps. The tree shape is held
//! by each group's ordered child lists plus each node's `parent`
//! back-reference; `Vault::validate` checks that the two agree and that
//! every node is reachable from the root exactly once.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{KdfParams, ProtectedValue};
use crate::errors::{KtwoError, Result};

pub type Timestamp = DateTime<Utc>;

/// Fields written by a newer version that this one does not know about.
pub type Extra = BTreeMap<String, serde_json::Value>;

// Standard field names.
pub const TITLE: &str = "Title";
pub const USER_NAME: &str = "UserName";
pub const PASSWORD: &str = "Password";
pub const URL: &str = "URL";
pub const NOTES: &str = "Notes";

/// Current time truncated to whole milliseconds.
pub fn now() -> Timestamp {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// A timestamp strictly later than `prev`, normally "now".
fn advance(prev: Timestamp) -> Timestamp {
    let now = now();
    if now > prev {
        now
    } else {
        prev + Duration::milliseconds(1)
    }
}

// ---------------------------------------------------------------------------
// Times
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Times {
    pub created_at: Timestamp,
    /// Bumped on any content change.
    pub last_modified: Timestamp,
    /// Bumped when the node moves to another parent.
    pub location_changed: Timestamp,
}

impl Times {
    pub fn now() -> Self {
        let t = now();
        Self {
            created_at: t,
            last_modified: t,
            location_changed: t,
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = advance(self.last_modified);
    }

    pub fn relocate(&mut self) {
        self.location_changed = advance(self.location_changed);
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A single field value, plain or protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Plain(String),
    Protected(ProtectedValue),
}

impl FieldValue {
    pub fn plain(value: impl Into<String>) -> Self {
        FieldValue::Plain(value.into())
    }

    pub fn protected(value: &str) -> Self {
        FieldValue::Protected(ProtectedValue::protect(value))
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, FieldValue::Protected(_))
    }

    /// Plaintext of the value, whichever kind it is.
    pub fn reveal(&self) -> Zeroizing<String> {
        match self {
            FieldValue::Plain(s) => Zeroizing::new(s.clone()),
            FieldValue::Protected(p) => p.reveal(),
        }
    }
}

/// Field name -> value mapping of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFields(BTreeMap<String, FieldValue>);

impl EntryFields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    /// A plain field's text; empty when missing or protected.
    pub fn text(&self, name: &str) -> &str {
        match self.0.get(name) {
            Some(FieldValue::Plain(s)) => s,
            _ => "",
        }
    }

    /// Any field's plaintext; empty when missing.
    pub fn reveal(&self, name: &str) -> Zeroizing<String> {
        self.0
            .get(name)
            .map(FieldValue::reveal)
            .unwrap_or_default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Entry / Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub uuid: Uuid,
    /// Owning group (back-reference).
    pub parent: Uuid,
    pub fields: EntryFields,
    pub times: Times,
    pub extra: Extra,
}

impl Entry {
    pub fn new(parent: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            parent,
            fields: EntryFields::default(),
            times: Times::now(),
            extra: Extra::new(),
        }
    }

    pub fn title(&self) -> &str {
        self.fields.text(TITLE)
    }

    pub fn user_name(&self) -> &str {
        self.fields.text(USER_NAME)
    }

    pub fn url(&self) -> &str {
        self.fields.text(URL)
    }

    pub fn notes(&self) -> &str {
        self.fields.text(NOTES)
    }

    /// The password, materialized on request only.
    pub fn password(&self) -> Zeroizing<String> {
        self.fields.reveal(PASSWORD)
    }

    /// Set a field and bump `last_modified`.
    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.set(name, value);
        self.times.touch();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    /// `None` only for the root group.
    pub parent: Option<Uuid>,
    /// Ordered child groups.
    pub groups: Vec<Uuid>,
    /// Ordered child entries.
    pub entries: Vec<Uuid>,
    pub times: Times,
    pub extra: Extra,
}

impl Group {
    pub fn new(name: &str, parent: Option<Uuid>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            parent,
            groups: Vec::new(),
            entries: Vec::new(),
            times: Times::now(),
            extra: Extra::new(),
        }
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.times.touch();
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Vault {
    pub name: String,
    /// Fixed at creation.
    pub kdf: KdfParams,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    /// The root ("default") group.
    pub root: Uuid,
    pub groups: BTreeMap<Uuid, Group>,
    pub entries: BTreeMap<Uuid, Entry>,
    /// Tombstones: uuid -> deletion time.
    pub deleted: BTreeMap<Uuid, Timestamp>,
    /// Serialized edit-state from the last successful sync.
    pub edit_state: Option<String>,
    pub extra: Extra,
    /// Unknown keys from the unencrypted container header.
    pub header_extra: Extra,
}

impl Vault {
    /// A new, empty vault whose default group is named after the vault.
    pub fn new(name: &str, kdf: KdfParams) -> Self {
        let root = Group::new(name, None);
        let root_uuid = root.uuid;
        let t = now();
        Self {
            name: name.to_string(),
            kdf,
            created_at: t,
            modified_at: t,
            root: root_uuid,
            groups: BTreeMap::from([(root_uuid, root)]),
            entries: BTreeMap::new(),
            deleted: BTreeMap::new(),
            edit_state: None,
            extra: Extra::new(),
            header_extra: Extra::new(),
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = advance(self.modified_at);
    }

    pub fn group(&self, uuid: &Uuid) -> Result<&Group> {
        self.groups
            .get(uuid)
            .ok_or_else(|| KtwoError::GroupNotFound(uuid.to_string()))
    }

    pub fn entry(&self, uuid: &Uuid) -> Result<&Entry> {
        self.entries
            .get(uuid)
            .ok_or_else(|| KtwoError::EntryNotFound(uuid.to_string()))
    }

    pub fn default_group(&self) -> Result<&Group> {
        self.group(&self.root)
    }

    fn group_mut(&mut self, uuid: &Uuid) -> Result<&mut Group> {
        self.groups
            .get_mut(uuid)
            .ok_or_else(|| KtwoError::GroupNotFound(uuid.to_string()))
    }

    /// Direct access to an entry. Callers bump its times themselves.
    pub fn entry_mut(&mut self, uuid: &Uuid) -> Result<&mut Entry> {
        self.entries
            .get_mut(uuid)
            .ok_or_else(|| KtwoError::EntryNotFound(uuid.to_string()))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Create a group under `parent` and return its UUID.
    pub fn create_group(&mut self, parent: Uuid, name: &str) -> Result<Uuid> {
        let group = Group::new(name, Some(parent));
        let uuid = group.uuid;
        self.group_mut(&parent)?.groups.push(uuid);
        self.groups.insert(uuid, group);
        self.touch();
        Ok(uuid)
    }

    /// Create an empty entry in `group` and return its UUID.
    pub fn create_entry(&mut self, group: Uuid) -> Result<Uuid> {
        let entry = Entry::new(group);
        let uuid = entry.uuid;
        self.group_mut(&group)?.entries.push(uuid);
        self.entries.insert(uuid, entry);
        self.touch();
        Ok(uuid)
    }

    pub fn set_field(&mut self, entry: Uuid, name: &str, value: FieldValue) -> Result<()> {
        self.entry_mut(&entry)?.set_field(name, value);
        self.touch();
        Ok(())
    }

    pub fn rename_group(&mut self, group: Uuid, name: &str) -> Result<()> {
        self.group_mut(&group)?.rename(name);
        self.touch();
        Ok(())
    }

    /// Move an entry to the end of another group.
    pub fn move_entry(&mut self, entry: Uuid, to: Uuid) -> Result<()> {
        self.group(&to)?;
        let from = self.entry(&entry)?.parent;
        if from == to {
            return Ok(());
        }
        self.group_mut(&from)?.entries.retain(|u| *u != entry);
        self.group_mut(&to)?.entries.push(entry);
        let e = self.entry_mut(&entry)?;
        e.parent = to;
        e.times.relocate();
        self.touch();
        Ok(())
    }

    /// Move a group (and its subtree) under another group.
    pub fn move_group(&mut self, group: Uuid, to: Uuid) -> Result<()> {
        if group == self.root {
            return Err(KtwoError::InvalidParameters(
                "the default group cannot be moved".into(),
            ));
        }
        self.group(&to)?;
        if self.is_ancestor(&group, &to) {
            return Err(KtwoError::InvalidParameters(
                "a group cannot be moved into its own subtree".into(),
            ));
        }
        let from = self.group(&group)?.parent;
        if from == Some(to) {
            return Ok(());
        }
        if let Some(from) = from {
            self.group_mut(&from)?.groups.retain(|u| *u != group);
        }
        self.group_mut(&to)?.groups.push(group);
        let g = self.group_mut(&group)?;
        g.parent = Some(to);
        g.times.relocate();
        self.touch();
        Ok(())
    }

    /// Remove an entry, leaving a tombstone behind.
    pub fn delete_entry(&mut self, entry: Uuid) -> Result<()> {
        let parent = self.entry(&entry)?.parent;
        self.group_mut(&parent)?.entries.retain(|u| *u != entry);
        self.entries.remove(&entry);
        self.deleted.insert(entry, now());
        self.touch();
        Ok(())
    }

    /// Remove a group and everything below it, leaving tombstones behind.
    pub fn delete_group(&mut self, group: Uuid) -> Result<()> {
        if group == self.root {
            return Err(KtwoError::InvalidParameters(
                "the default group cannot be deleted".into(),
            ));
        }
        let parent = self.group(&group)?.parent;
        if let Some(parent) = parent {
            self.group_mut(&parent)?.groups.retain(|u| *u != group);
        }

        let t = now();
        let mut stack = vec![group];
        while let Some(uuid) = stack.pop() {
            if let Some(g) = self.groups.remove(&uuid) {
                for e in &g.entries {
                    self.entries.remove(e);
                    self.deleted.insert(*e, t);
                }
                stack.extend(g.groups.iter().copied());
                self.deleted.insert(uuid, t);
            }
        }
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// First group with this name, searching depth-first from the root.
    pub fn find_group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups_depth_first()
            .into_iter()
            .find(|g| g.name == name)
    }

    /// Entries directly inside `group`, in order.
    pub fn entries_in<'a>(&'a self, group: &'a Group) -> impl Iterator<Item = &'a Entry> + 'a {
        group.entries.iter().filter_map(|u| self.entries.get(u))
    }

    /// All groups, depth-first from the root, in child order.
    pub fn groups_depth_first(&self) -> Vec<&Group> {
        let mut out = Vec::with_capacity(self.groups.len());
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.root];
        while let Some(uuid) = stack.pop() {
            if !seen.insert(uuid) {
                continue;
            }
            if let Some(g) = self.groups.get(&uuid) {
                out.push(g);
                stack.extend(g.groups.iter().rev().copied());
            }
        }
        out
    }

    /// Every entry with its owning group, depth-first.
    pub fn walk(&self) -> Vec<(&Group, &Entry)> {
        self.groups_depth_first()
            .into_iter()
            .flat_map(|g| self.entries_in(g).map(move |e| (g, e)))
            .collect()
    }

    /// Whether `ancestor` is `node` or lies on its path to the root.
    pub fn is_ancestor(&self, ancestor: &Uuid, node: &Uuid) -> bool {
        let mut current = Some(*node);
        let mut hops = 0;
        while let Some(uuid) = current {
            if uuid == *ancestor {
                return true;
            }
            hops += 1;
            if hops > self.groups.len() {
                return false;
            }
            current = self.groups.get(&uuid).and_then(|g| g.parent);
        }
        false
    }

    /// Check the tree invariant.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(KtwoError::InvalidContainer(format!("vault tree: {msg}")));

        let Some(root) = self.groups.get(&self.root) else {
            return bad("root group is missing".into());
        };
        if root.parent.is_some() {
            return bad("root group has a parent".into());
        }

        for g in self.groups.values() {
            if g.uuid != self.root {
                let Some(parent) = g.parent.and_then(|p| self.groups.get(&p)) else {
                    return bad(format!("group {} has no valid parent", g.uuid));
                };
                if parent.groups.iter().filter(|u| **u == g.uuid).count() != 1 {
                    return bad(format!("group {} is not listed once by its parent", g.uuid));
                }
            }
            for child in &g.groups {
                if self.groups.get(child).and_then(|c| c.parent) != Some(g.uuid) {
                    return bad(format!("group {} lists a foreign child group", g.uuid));
                }
            }
            for child in &g.entries {
                if self.entries.get(child).map(|e| e.parent) != Some(g.uuid) {
                    return bad(format!("group {} lists a foreign entry", g.uuid));
                }
            }
        }

        for e in self.entries.values() {
            let Some(parent) = self.groups.get(&e.parent) else {
                return bad(format!("entry {} has no valid parent", e.uuid));
            };
            if parent.entries.iter().filter(|u| **u == e.uuid).count() != 1 {
                return bad(format!("entry {} is not listed once by its parent", e.uuid));
            }
        }

        if self.groups_depth_first().len() != self.groups.len() {
            return bad("some groups are unreachable from the root".into());
        }

        Ok(())
    }
}
