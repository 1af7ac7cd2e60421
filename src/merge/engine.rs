//! Three-way merge of two replicas of the same vault.
//!
//! Every group and entry is resolved on its own, keyed by UUID, against
//! the edit-state snapshot taken at the last successful sync:
//!
//! - on both sides, unchanged on one: the changed side wins;
//! - on both sides, changed on both: the later `last_modified` wins;
//! - on both sides, unknown to the snapshot: duplicate creation, the
//!   later copy is kept and the conflict reported;
//! - on one side and unknown to the snapshot: a new node, copied over
//!   unless the other side holds a newer tombstone for it;
//! - on one side and known to the snapshot: deleted on the other side.
//!   The deletion stands if the survivor is unmodified, otherwise the
//!   survivor is resurrected.
//!
//! Content and location are resolved independently (`last_modified`
//! versus `location_changed`), so a move on one side and an edit on the
//! other both survive. Ties are broken by a content digest, never by
//! argument order, so merges of disjoint edits commute.
//!
//! Data-shape conflicts never fail the merge; they are reported in
//! `MergeReport` and logged.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::edit_state::{EditState, EntityState};
use crate::errors::{KtwoError, Result};
use crate::vault::model::{Entry, Group, Times, Timestamp, Vault};

/// Which replica a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
    /// Both sides agreed.
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Entry,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Group => f.write_str("group"),
            NodeKind::Entry => f.write_str("entry"),
        }
    }
}

/// A conflict the merge resolved on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeConflict {
    /// Same UUID created independently on both sides.
    DuplicateCreation { kind: NodeKind, uuid: Uuid, kept: Side },
    /// Modified on both sides since the last sync.
    ConcurrentEdit { kind: NodeKind, uuid: Uuid, kept: Side },
    /// Moved to different parents on both sides.
    ConcurrentMove { kind: NodeKind, uuid: Uuid, kept: Side },
    /// Deleted on one side but modified on the other; modification kept.
    Resurrected { kind: NodeKind, uuid: Uuid },
    /// New on one side but tombstoned later on the other; deletion kept.
    CreationDeleted { kind: NodeKind, uuid: Uuid },
    /// Parent group no longer exists; re-attached to the default group.
    Orphaned { kind: NodeKind, uuid: Uuid },
    /// Concurrent moves formed a cycle; re-attached to the default group.
    CycleBroken { uuid: Uuid },
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeConflict::DuplicateCreation { kind, uuid, kept } => {
                write!(f, "{kind} {uuid} was created on both sides; kept {kept:?} copy")
            }
            MergeConflict::ConcurrentEdit { kind, uuid, kept } => {
                write!(f, "{kind} {uuid} was edited on both sides; kept {kept:?} version")
            }
            MergeConflict::ConcurrentMove { kind, uuid, kept } => {
                write!(f, "{kind} {uuid} was moved on both sides; kept {kept:?} location")
            }
            MergeConflict::Resurrected { kind, uuid } => {
                write!(f, "{kind} {uuid} was deleted on one side but edited on the other; kept it")
            }
            MergeConflict::CreationDeleted { kind, uuid } => {
                write!(f, "{kind} {uuid} was deleted after being created; dropped it")
            }
            MergeConflict::Orphaned { kind, uuid } => {
                write!(f, "{kind} {uuid} lost its group; moved to the default group")
            }
            MergeConflict::CycleBroken { uuid } => {
                write!(f, "group {uuid} was moved into its own subtree; moved to the default group")
            }
        }
    }
}

/// What the merge did, for display and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub conflicts: Vec<MergeConflict>,
    /// Nodes whose merged version came from the remote side.
    pub from_remote: usize,
    /// Nodes removed because one side deleted them.
    pub deleted: usize,
}

impl MergeReport {
    fn conflict(&mut self, conflict: MergeConflict) {
        warn!(conflict = %conflict, "merge conflict resolved");
        self.conflicts.push(conflict);
    }
}

/// The merged vault plus the snapshot to store for the next sync.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub vault: Vault,
    pub edit_state: EditState,
    pub report: MergeReport,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

trait Node: Clone {
    const KIND: NodeKind;
    fn uuid(&self) -> Uuid;
    fn times(&self) -> &Times;
    fn times_mut(&mut self) -> &mut Times;
    fn parent(&self) -> Option<Uuid>;
    fn set_parent(&mut self, parent: Uuid);
    fn digest(&self) -> [u8; 32];
}

fn hash_extra(hasher: &mut Sha256, extra: &crate::vault::model::Extra) {
    for (k, v) in extra {
        hasher.update((k.len() as u64).to_le_bytes());
        hasher.update(k.as_bytes());
        let rendered = v.to_string();
        hasher.update((rendered.len() as u64).to_le_bytes());
        hasher.update(rendered.as_bytes());
    }
}

impl Node for Group {
    const KIND: NodeKind = NodeKind::Group;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
    fn times(&self) -> &Times {
        &self.times
    }
    fn times_mut(&mut self) -> &mut Times {
        &mut self.times
    }
    fn parent(&self) -> Option<Uuid> {
        self.parent
    }
    fn set_parent(&mut self, parent: Uuid) {
        self.parent = Some(parent);
    }
    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.name.len() as u64).to_le_bytes());
        hasher.update(self.name.as_bytes());
        hash_extra(&mut hasher, &self.extra);
        hasher.finalize().into()
    }
}

impl Node for Entry {
    const KIND: NodeKind = NodeKind::Entry;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
    fn times(&self) -> &Times {
        &self.times
    }
    fn times_mut(&mut self) -> &mut Times {
        &mut self.times
    }
    fn parent(&self) -> Option<Uuid> {
        Some(self.parent)
    }
    fn set_parent(&mut self, parent: Uuid) {
        self.parent = parent;
    }
    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for (name, value) in self.fields.iter() {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update([u8::from(value.is_protected())]);
            let plain = value.reveal();
            hasher.update((plain.len() as u64).to_le_bytes());
            hasher.update(plain.as_bytes());
        }
        hash_extra(&mut hasher, &self.extra);
        hasher.finalize().into()
    }
}

/// The later of two versions by `last_modified`, digest on ties.
fn newer<'a, T: Node>(local: &'a T, remote: &'a T) -> (&'a T, Side) {
    match local
        .times()
        .last_modified
        .cmp(&remote.times().last_modified)
    {
        Ordering::Greater => (local, Side::Local),
        Ordering::Less => (remote, Side::Remote),
        Ordering::Equal => match local.digest().cmp(&remote.digest()) {
            Ordering::Greater => (local, Side::Local),
            Ordering::Less => (remote, Side::Remote),
            Ordering::Equal => (local, Side::Either),
        },
    }
}

/// The later of two locations by `location_changed`, parent on ties.
fn newer_location<T: Node>(local: &T, remote: &T) -> (Option<Uuid>, Timestamp, Side) {
    let l = (local.times().location_changed, local.parent());
    let r = (remote.times().location_changed, remote.parent());
    match l.cmp(&r) {
        Ordering::Greater => (l.1, l.0, Side::Local),
        Ordering::Less => (r.1, r.0, Side::Remote),
        Ordering::Equal => (l.1, l.0, Side::Either),
    }
}

fn content_changed<T: Node>(node: &T, base: &EntityState) -> bool {
    node.times().last_modified != base.last_modified
}

fn location_changed<T: Node>(node: &T, base: &EntityState) -> bool {
    node.times().location_changed != base.location_changed || node.parent() != base.parent
}

/// Resolve one node. `None` means it is absent from the merged vault.
fn resolve<T: Node>(
    local: Option<&T>,
    remote: Option<&T>,
    base: Option<&EntityState>,
    local_tomb: Option<&Timestamp>,
    remote_tomb: Option<&Timestamp>,
    report: &mut MergeReport,
) -> Option<(T, Side)> {
    match (local, remote) {
        (Some(l), Some(r)) => {
            let uuid = l.uuid();
            let (content, side) = match base {
                None => {
                    let (winner, side) = newer(l, r);
                    if side != Side::Either || l.times() != r.times() {
                        report.conflict(MergeConflict::DuplicateCreation {
                            kind: T::KIND,
                            uuid,
                            kept: side,
                        });
                    }
                    (winner, side)
                }
                Some(b) => match (content_changed(l, b), content_changed(r, b)) {
                    (false, false) => (l, Side::Either),
                    (true, false) => (l, Side::Local),
                    (false, true) => (r, Side::Remote),
                    (true, true) => {
                        let (winner, side) = newer(l, r);
                        if side != Side::Either {
                            report.conflict(MergeConflict::ConcurrentEdit {
                                kind: T::KIND,
                                uuid,
                                kept: side,
                            });
                        }
                        (winner, side)
                    }
                },
            };

            let (parent, moved_at) = match base {
                None => {
                    let (p, t, _) = newer_location(l, r);
                    (p, t)
                }
                Some(b) => match (location_changed(l, b), location_changed(r, b)) {
                    (false, false) | (true, false) => {
                        (l.parent(), l.times().location_changed)
                    }
                    (false, true) => (r.parent(), r.times().location_changed),
                    (true, true) => {
                        let (p, t, kept) = newer_location(l, r);
                        if l.parent() != r.parent() {
                            report.conflict(MergeConflict::ConcurrentMove {
                                kind: T::KIND,
                                uuid,
                                kept,
                            });
                        }
                        (p, t)
                    }
                },
            };

            let mut node = content.clone();
            if let Some(parent) = parent {
                node.set_parent(parent);
            }
            node.times_mut().location_changed = moved_at;
            if side == Side::Remote {
                report.from_remote += 1;
            }
            Some((node, side))
        }
        (Some(n), None) | (None, Some(n)) => {
            let side = if local.is_some() {
                Side::Local
            } else {
                Side::Remote
            };
            let other_tomb = if local.is_some() {
                remote_tomb
            } else {
                local_tomb
            };
            match base {
                Some(b) => {
                    if !content_changed(n, b) && !location_changed(n, b) {
                        let kind = T::KIND;
                        debug!(%kind, uuid = %n.uuid(), "deletion propagated");
                        report.deleted += 1;
                        None
                    } else {
                        report.conflict(MergeConflict::Resurrected {
                            kind: T::KIND,
                            uuid: n.uuid(),
                        });
                        if side == Side::Remote {
                            report.from_remote += 1;
                        }
                        Some((n.clone(), side))
                    }
                }
                None => match other_tomb {
                    Some(deleted_at) if *deleted_at >= n.times().last_modified => {
                        report.conflict(MergeConflict::CreationDeleted {
                            kind: T::KIND,
                            uuid: n.uuid(),
                        });
                        report.deleted += 1;
                        None
                    }
                    _ => {
                        if side == Side::Remote {
                            report.from_remote += 1;
                        }
                        Some((n.clone(), side))
                    }
                },
            }
        }
        (None, None) => None,
    }
}

// ---------------------------------------------------------------------------
// Child ordering
// ---------------------------------------------------------------------------

/// Merge two orderings of the same parent's children.
///
/// Children on both lists keep `primary`'s order. A child on only one
/// list goes right after its nearest preceding shared sibling on that
/// list; when both lists insert at the same spot, the run whose first
/// child is older (then smaller UUID) goes first. Members on neither
/// list are appended oldest first.
fn merge_order(
    primary: &[Uuid],
    secondary: &[Uuid],
    members: &BTreeSet<Uuid>,
    key: impl Fn(&Uuid) -> (Timestamp, Uuid),
) -> Vec<Uuid> {
    let dedup = |list: &[Uuid]| -> Vec<Uuid> {
        let mut seen = BTreeSet::new();
        list.iter()
            .filter(|u| members.contains(*u) && seen.insert(**u))
            .copied()
            .collect()
    };
    let p = dedup(primary);
    let s = dedup(secondary);
    let in_p: BTreeSet<Uuid> = p.iter().copied().collect();
    let in_s: BTreeSet<Uuid> = s.iter().copied().collect();

    // anchor -> (run from primary, run from secondary)
    let mut runs: BTreeMap<Option<Uuid>, (Vec<Uuid>, Vec<Uuid>)> = BTreeMap::new();
    for (list, other, from_primary) in [(&p, &in_s, true), (&s, &in_p, false)] {
        let mut anchor = None;
        for u in list {
            if other.contains(u) {
                anchor = Some(*u);
            } else {
                let run = runs.entry(anchor).or_default();
                if from_primary {
                    run.0.push(*u);
                } else {
                    run.1.push(*u);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(members.len());
    let mut emit_run = |anchor: Option<Uuid>, out: &mut Vec<Uuid>| {
        if let Some((a, b)) = runs.remove(&anchor) {
            let a_first = match (a.first(), b.first()) {
                (Some(x), Some(y)) => key(x) <= key(y),
                _ => true,
            };
            if a_first {
                out.extend(a);
                out.extend(b);
            } else {
                out.extend(b);
                out.extend(a);
            }
        }
    };

    emit_run(None, &mut out);
    for u in p.iter().filter(|u| in_s.contains(*u)) {
        out.push(*u);
        emit_run(Some(*u), &mut out);
    }

    let placed: BTreeSet<Uuid> = out.iter().copied().collect();
    let mut rest: Vec<Uuid> = members
        .iter()
        .filter(|u| !placed.contains(*u))
        .copied()
        .collect();
    rest.sort_by_key(|u| key(u));
    out.extend(rest);
    out
}

/// Pick whose child order leads for a group present on both sides.
fn primary_is_local(side: Side, local: &[Uuid], remote: &[Uuid]) -> bool {
    match side {
        Side::Local => true,
        Side::Remote => false,
        Side::Either => local <= remote,
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `remote` into `local` using `base` as the common ancestor.
///
/// Fails only if the two vaults are not replicas of the same vault
/// (different root groups).
pub fn merge(local: &Vault, remote: &Vault, base: &EditState) -> Result<MergeOutcome> {
    if local.root != remote.root {
        return Err(KtwoError::InvalidParameters(
            "local and remote vaults have different root groups".into(),
        ));
    }
    if let Some(base_root) = base.root {
        if base_root != local.root {
            warn!("edit state belongs to another vault, ignoring it");
            return merge(local, remote, &EditState::empty());
        }
    }

    let mut report = MergeReport::default();
    let root = local.root;

    // --- Resolve groups ---
    let group_ids: BTreeSet<Uuid> = local
        .groups
        .keys()
        .chain(remote.groups.keys())
        .copied()
        .collect();
    let mut groups: BTreeMap<Uuid, Group> = BTreeMap::new();
    let mut group_side: BTreeMap<Uuid, Side> = BTreeMap::new();
    for uuid in group_ids {
        if let Some((mut g, side)) = resolve(
            local.groups.get(&uuid),
            remote.groups.get(&uuid),
            base.groups.get(&uuid),
            local.deleted.get(&uuid),
            remote.deleted.get(&uuid),
            &mut report,
        ) {
            if uuid == root {
                g.parent = None;
            }
            g.groups.clear();
            g.entries.clear();
            group_side.insert(uuid, side);
            groups.insert(uuid, g);
        }
    }
    if !groups.contains_key(&root) {
        return Err(KtwoError::InvalidParameters(
            "default group is missing from both vaults".into(),
        ));
    }

    // --- Resolve entries ---
    let entry_ids: BTreeSet<Uuid> = local
        .entries
        .keys()
        .chain(remote.entries.keys())
        .copied()
        .collect();
    let mut entries: BTreeMap<Uuid, Entry> = BTreeMap::new();
    for uuid in entry_ids {
        if let Some((e, _)) = resolve(
            local.entries.get(&uuid),
            remote.entries.get(&uuid),
            base.entries.get(&uuid),
            local.deleted.get(&uuid),
            remote.deleted.get(&uuid),
            &mut report,
        ) {
            entries.insert(uuid, e);
        }
    }

    // --- Repair structure ---
    let group_uuids: Vec<Uuid> = groups.keys().copied().collect();
    for uuid in &group_uuids {
        if *uuid == root {
            continue;
        }
        let parent_ok = groups
            .get(uuid)
            .and_then(|g| g.parent)
            .is_some_and(|p| groups.contains_key(&p));
        if !parent_ok {
            if let Some(g) = groups.get_mut(uuid) {
                g.parent = Some(root);
            }
            report.conflict(MergeConflict::Orphaned {
                kind: NodeKind::Group,
                uuid: *uuid,
            });
        }
    }
    for uuid in &group_uuids {
        if !reaches_root(&groups, *uuid, root) {
            if let Some(g) = groups.get_mut(uuid) {
                g.parent = Some(root);
            }
            report.conflict(MergeConflict::CycleBroken { uuid: *uuid });
        }
    }
    for e in entries.values_mut() {
        if !groups.contains_key(&e.parent) {
            e.parent = root;
            report.conflict(MergeConflict::Orphaned {
                kind: NodeKind::Entry,
                uuid: e.uuid,
            });
        }
    }

    // --- Rebuild child lists ---
    let mut child_groups: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    for g in groups.values() {
        if let Some(p) = g.parent {
            child_groups.entry(p).or_default().insert(g.uuid);
        }
    }
    let mut child_entries: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    for e in entries.values() {
        child_entries.entry(e.parent).or_default().insert(e.uuid);
    }

    let empty = Vec::new();
    let group_key = |u: &Uuid| {
        (
            groups
                .get(u)
                .map_or(Timestamp::MIN_UTC, |g| g.times.created_at),
            *u,
        )
    };
    let entry_key = |u: &Uuid| {
        (
            entries
                .get(u)
                .map_or(Timestamp::MIN_UTC, |e| e.times.created_at),
            *u,
        )
    };
    let mut ordered: BTreeMap<Uuid, (Vec<Uuid>, Vec<Uuid>)> = BTreeMap::new();
    for uuid in groups.keys() {
        let l = local.groups.get(uuid);
        let r = remote.groups.get(uuid);
        let side = group_side.get(uuid).copied().unwrap_or(Side::Either);

        let lg = l.map_or(&empty, |g| &g.groups);
        let rg = r.map_or(&empty, |g| &g.groups);
        let le = l.map_or(&empty, |g| &g.entries);
        let re = r.map_or(&empty, |g| &g.entries);

        let no_children = BTreeSet::new();
        let gm = child_groups.get(uuid).unwrap_or(&no_children);
        let em = child_entries.get(uuid).unwrap_or(&no_children);

        let sub_groups = if primary_is_local(side, lg, rg) {
            merge_order(lg, rg, gm, group_key)
        } else {
            merge_order(rg, lg, gm, group_key)
        };
        let sub_entries = if primary_is_local(side, le, re) {
            merge_order(le, re, em, entry_key)
        } else {
            merge_order(re, le, em, entry_key)
        };
        ordered.insert(*uuid, (sub_groups, sub_entries));
    }
    for (uuid, (sub_groups, sub_entries)) in ordered {
        if let Some(g) = groups.get_mut(&uuid) {
            g.groups = sub_groups;
            g.entries = sub_entries;
        }
    }

    // --- Tombstones ---
    let mut deleted = local.deleted.clone();
    for (uuid, at) in &remote.deleted {
        deleted
            .entry(*uuid)
            .and_modify(|t| *t = (*t).max(*at))
            .or_insert(*at);
    }
    deleted.retain(|uuid, _| !groups.contains_key(uuid) && !entries.contains_key(uuid));

    let mut extra = remote.extra.clone();
    extra.extend(local.extra.clone());

    let mut vault = Vault {
        name: local.name.clone(),
        kdf: local.kdf.clone(),
        created_at: local.created_at,
        modified_at: local.modified_at.max(remote.modified_at),
        root,
        groups,
        entries,
        deleted,
        edit_state: None,
        extra,
        header_extra: local.header_extra.clone(),
    };
    vault.validate()?;

    let edit_state = EditState::capture(&vault);
    vault.edit_state = Some(edit_state.encode()?);

    debug!(
        groups = vault.groups.len(),
        entries = vault.entries.len(),
        conflicts = report.conflicts.len(),
        "merge complete"
    );

    Ok(MergeOutcome {
        vault,
        edit_state,
        report,
    })
}

fn reaches_root(groups: &BTreeMap<Uuid, Group>, start: Uuid, root: Uuid) -> bool {
    let mut current = start;
    for _ in 0..=groups.len() {
        if current == root {
            return true;
        }
        match groups.get(&current).and_then(|g| g.parent) {
            Some(p) => current = p,
            None => return false,
        }
    }
    false
}
