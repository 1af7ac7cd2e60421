//! Integration tests for the three-way merge engine.

use chrono::Duration;
use ktwo::crypto::{KdfCost, KdfParams};
use ktwo::errors::KtwoError;
use ktwo::merge::{merge, EditState, MergeConflict};
use ktwo::vault::model::{self, FieldValue};
use ktwo::vault::Vault;
use uuid::Uuid;

struct Fixture {
    base: Vault,
    web: Uuid,
    mail: Uuid,
    bank: Uuid,
}

/// A synced vault: root { web { mail }, bank }, with its edit state.
fn fixture() -> Fixture {
    let kdf = KdfParams::generate(&KdfCost {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
        ..KdfCost::default()
    })
    .unwrap();
    let mut v = Vault::new("vault1", kdf);
    let web = v.create_group(v.root, "web").unwrap();
    let mail = v.create_entry(web).unwrap();
    v.set_field(mail, model::TITLE, FieldValue::plain("mail")).unwrap();
    v.set_field(mail, model::PASSWORD, FieldValue::protected("m-1")).unwrap();
    let bank = v.create_entry(v.root).unwrap();
    v.set_field(bank, model::TITLE, FieldValue::plain("bank")).unwrap();
    snapshot(&mut v);
    Fixture {
        base: v,
        web,
        mail,
        bank,
    }
}

fn snapshot(v: &mut Vault) {
    v.edit_state = Some(EditState::capture(v).encode().unwrap());
}

fn base_state(v: &Vault) -> EditState {
    EditState::of(v).unwrap()
}

fn add_entry(v: &mut Vault, group: Uuid, title: &str) -> Uuid {
    let e = v.create_entry(group).unwrap();
    v.set_field(e, model::TITLE, FieldValue::plain(title)).unwrap();
    e
}

// ---------------------------------------------------------------------------
// Algebraic properties
// ---------------------------------------------------------------------------

#[test]
fn merging_a_vault_with_itself_is_the_identity() {
    let f = fixture();
    let state = base_state(&f.base);

    let outcome = merge(&f.base, &f.base, &state).unwrap();

    assert_eq!(outcome.vault, f.base);
    assert!(outcome.report.conflicts.is_empty());
}

#[test]
fn disjoint_edits_commute() {
    let f = fixture();
    let state = base_state(&f.base);

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.set_field(f.mail, model::USER_NAME, FieldValue::plain("me")).unwrap();
    let a_root = a.root;
    add_entry(&mut a, a_root, "from-a");
    b.set_field(f.bank, model::URL, FieldValue::plain("https://bank")).unwrap();
    let shop = b.create_group(b.root, "shop").unwrap();
    add_entry(&mut b, shop, "from-b");

    let ab = merge(&a, &b, &state).unwrap();
    let ba = merge(&b, &a, &state).unwrap();

    assert_eq!(ab.vault, ba.vault);
    assert!(ab.report.conflicts.is_empty());
    assert_eq!(ab.vault.entries.len(), 4);
    assert_eq!(ab.vault.entry(&f.mail).unwrap().user_name(), "me");
    assert_eq!(ab.vault.entry(&f.bank).unwrap().url(), "https://bank");
    ab.vault.validate().unwrap();
}

#[test]
fn merge_result_carries_a_fresh_edit_state() {
    let f = fixture();
    let mut a = f.base.clone();
    let a_root = a.root;
    add_entry(&mut a, a_root, "new");

    let outcome = merge(&a, &f.base, &base_state(&f.base)).unwrap();

    assert_eq!(outcome.edit_state, EditState::capture(&outcome.vault));
    assert_eq!(EditState::of(&outcome.vault).unwrap(), outcome.edit_state);
}

// ---------------------------------------------------------------------------
// Last writer wins
// ---------------------------------------------------------------------------

#[test]
fn concurrent_edits_keep_the_later_one() {
    let f = fixture();
    let state = base_state(&f.base);
    let t0 = f.base.entry(&f.mail).unwrap().times.last_modified;

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.set_field(f.mail, model::PASSWORD, FieldValue::protected("from-a")).unwrap();
    b.set_field(f.mail, model::PASSWORD, FieldValue::protected("from-b")).unwrap();
    a.entry_mut(&f.mail).unwrap().times.last_modified = t0 + Duration::milliseconds(10);
    b.entry_mut(&f.mail).unwrap().times.last_modified = t0 + Duration::milliseconds(20);

    for (local, remote) in [(&a, &b), (&b, &a)] {
        let outcome = merge(local, remote, &state).unwrap();
        assert_eq!(
            outcome.vault.entry(&f.mail).unwrap().password().as_str(),
            "from-b"
        );
        assert!(outcome
            .report
            .conflicts
            .iter()
            .any(|c| matches!(c, MergeConflict::ConcurrentEdit { uuid, .. } if *uuid == f.mail)));
    }
}

#[test]
fn equal_timestamps_resolve_the_same_way_from_both_sides() {
    let f = fixture();
    let state = base_state(&f.base);
    let t = f.base.entry(&f.mail).unwrap().times.last_modified + Duration::milliseconds(5);

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.set_field(f.mail, model::NOTES, FieldValue::plain("a")).unwrap();
    b.set_field(f.mail, model::NOTES, FieldValue::plain("b")).unwrap();
    a.entry_mut(&f.mail).unwrap().times.last_modified = t;
    b.entry_mut(&f.mail).unwrap().times.last_modified = t;

    let ab = merge(&a, &b, &state).unwrap();
    let ba = merge(&b, &a, &state).unwrap();
    assert_eq!(
        ab.vault.entry(&f.mail).unwrap().notes(),
        ba.vault.entry(&f.mail).unwrap().notes()
    );
}

#[test]
fn a_move_and_an_edit_both_survive() {
    let f = fixture();
    let state = base_state(&f.base);

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.move_entry(f.mail, a.root).unwrap();
    b.set_field(f.mail, model::PASSWORD, FieldValue::protected("rotated")).unwrap();

    let outcome = merge(&a, &b, &state).unwrap();
    let mail = outcome.vault.entry(&f.mail).unwrap();
    assert_eq!(mail.parent, outcome.vault.root);
    assert_eq!(mail.password().as_str(), "rotated");
    assert!(!outcome.vault.group(&f.web).unwrap().entries.contains(&f.mail));
    outcome.vault.validate().unwrap();
}

// ---------------------------------------------------------------------------
// Deletions
// ---------------------------------------------------------------------------

#[test]
fn deletions_propagate() {
    let f = fixture();
    let state = base_state(&f.base);

    let mut a = f.base.clone();
    a.delete_entry(f.bank).unwrap();

    for (local, remote) in [(&a, &f.base), (&f.base, &a)] {
        let outcome = merge(local, remote, &state).unwrap();
        assert!(!outcome.vault.entries.contains_key(&f.bank));
        assert!(outcome.vault.deleted.contains_key(&f.bank));
        assert_eq!(outcome.report.deleted, 1);
    }
}

#[test]
fn deleted_group_takes_its_unchanged_entries_along() {
    let f = fixture();
    let mut a = f.base.clone();
    a.delete_group(f.web).unwrap();

    let outcome = merge(&f.base, &a, &base_state(&f.base)).unwrap();

    assert!(!outcome.vault.groups.contains_key(&f.web));
    assert!(!outcome.vault.entries.contains_key(&f.mail));
    outcome.vault.validate().unwrap();
}

#[test]
fn edit_beats_concurrent_deletion() {
    let f = fixture();
    let state = base_state(&f.base);

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.delete_entry(f.bank).unwrap();
    b.set_field(f.bank, model::NOTES, FieldValue::plain("still needed")).unwrap();

    let outcome = merge(&a, &b, &state).unwrap();
    assert_eq!(outcome.vault.entry(&f.bank).unwrap().notes(), "still needed");
    assert!(!outcome.vault.deleted.contains_key(&f.bank));
    assert!(outcome
        .report
        .conflicts
        .contains(&MergeConflict::Resurrected {
            kind: ktwo::merge::NodeKind::Entry,
            uuid: f.bank,
        }));
}

#[test]
fn newer_tombstone_wins_without_a_common_base() {
    let f = fixture();
    let mut a = f.base.clone();
    let mut b = f.base.clone();
    let a_root = a.root;
    let doomed = add_entry(&mut a, a_root, "short-lived");
    let created = a.entry(&doomed).unwrap().times.last_modified;
    b.deleted.insert(doomed, created + Duration::milliseconds(1));

    let outcome = merge(&a, &b, &EditState::empty()).unwrap();

    assert!(!outcome.vault.entries.contains_key(&doomed));
    assert!(outcome.vault.deleted.contains_key(&doomed));
}

#[test]
fn entry_added_to_a_deleted_group_is_rescued() {
    let f = fixture();
    let state = base_state(&f.base);

    let mut a = f.base.clone();
    let mut b = f.base.clone();
    a.delete_group(f.web).unwrap();
    let late = add_entry(&mut b, f.web, "late");

    let outcome = merge(&a, &b, &state).unwrap();

    let entry = outcome.vault.entry(&late).unwrap();
    assert_eq!(entry.parent, outcome.vault.root);
    assert!(outcome.report.conflicts.iter().any(
        |c| matches!(c, MergeConflict::Orphaned { uuid, .. } if *uuid == late)
    ));
    outcome.vault.validate().unwrap();
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[test]
fn crossing_group_moves_do_not_create_a_cycle() {
    let mut base = fixture().base;
    let g1 = base.create_group(base.root, "g1").unwrap();
    let g2 = base.create_group(base.root, "g2").unwrap();
    snapshot(&mut base);
    let state = base_state(&base);

    let mut a = base.clone();
    let mut b = base.clone();
    a.move_group(g1, g2).unwrap();
    b.move_group(g2, g1).unwrap();

    let outcome = merge(&a, &b, &state).unwrap();
    outcome.vault.validate().unwrap();
    assert!(outcome
        .report
        .conflicts
        .iter()
        .any(|c| matches!(c, MergeConflict::CycleBroken { .. })));
}

#[test]
fn same_uuid_created_twice_is_reported() {
    let f = fixture();
    let mut a = f.base.clone();
    let mut b = f.base.clone();
    let a_root = a.root;
    let e = add_entry(&mut a, a_root, "twin");
    let copy = a.entry(&e).unwrap().clone();
    let root = b.root;
    b.entries.insert(e, copy);
    b.groups.get_mut(&root).unwrap().entries.push(e);
    b.set_field(e, model::NOTES, FieldValue::plain("changed on b")).unwrap();

    let outcome = merge(&a, &b, &base_state(&f.base)).unwrap();
    assert_eq!(outcome.vault.entry(&e).unwrap().notes(), "changed on b");
    assert!(outcome
        .report
        .conflicts
        .iter()
        .any(|c| matches!(c, MergeConflict::DuplicateCreation { uuid, .. } if *uuid == e)));
}

#[test]
fn vaults_with_different_roots_are_rejected() {
    let f = fixture();
    let other = Vault::new("other", f.base.kdf.clone());

    assert!(matches!(
        merge(&f.base, &other, &EditState::empty()),
        Err(KtwoError::InvalidParameters(_))
    ));
}

#[test]
fn unreadable_edit_state_is_malformed() {
    let mut v = fixture().base;
    v.edit_state = Some("definitely not an edit state".into());
    assert!(matches!(
        EditState::of(&v),
        Err(KtwoError::MalformedEditState(_))
    ));
}
