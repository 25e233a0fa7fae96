//! Cross-instance convergence through a shared bare remote.
//!
//! Instances run in batch mode so each test controls exactly when
//! histories exchange. The usual dance is: mutate on both sides, flush X
//! (push), flush Y (merge + push), flush X (fast-forward), then assert
//! both sides read identical state.

mod fixtures;

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::json;

use fixtures::{kind, note, Rig};
use trove::{
    NodeId, ParentRef, RecordFilter, RecordId, Store, SyncOutcome, SyncStatus, TreeName, TreeNode,
};

fn record_ids(store: &Store) -> BTreeSet<RecordId> {
    let mut ids = BTreeSet::new();
    store
        .each(&RecordFilter::any(), |r| {
            ids.insert(r.id);
            Ok(())
        })
        .expect("each");
    ids
}

fn walk_nodes(store: &Store, tree: &str) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    store
        .tree(TreeName::parse(tree).expect("name"))
        .walk(|node, _| {
            nodes.push(node.clone());
            Ok(())
        })
        .expect("walk");
    nodes
}

/// flush X (push) → flush Y (merge+push) → flush X (pick up the merge).
fn exchange(x: &Store, y: &Store) {
    x.flush().expect("flush x");
    y.flush().expect("flush y");
    x.flush().expect("flush x again");
}

#[test]
fn write_is_visible_after_sync() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");

    let id = x.write(note(json!({"a": 1}), &["foo"])).expect("write");
    assert_eq!(x.flush().expect("flush x"), SyncOutcome::Pushed);
    assert_eq!(y.flush().expect("flush y"), SyncOutcome::FastForwarded);

    let mut seen = Vec::new();
    y.each(&RecordFilter::kind(kind("note")), |r| {
        seen.push(r);
        Ok(())
    })
    .expect("each");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, id);
    assert_eq!(seen[0].content, json!({"a": 1}));
}

#[test]
fn concurrent_alters_leave_two_descendants() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");

    let source = x.write(note(json!({"v": 0}), &[])).expect("write");
    exchange(&x, &y);
    assert_eq!(record_ids(&y), record_ids(&x));

    let from_x = x
        .alter(&source, |r| {
            let mut d = trove::RecordDraft::from(r);
            d.content = json!({"v": "x"});
            Ok(d)
        })
        .expect("alter on x");
    let from_y = y
        .alter(&source, |r| {
            let mut d = trove::RecordDraft::from(r);
            d.content = json!({"v": "y"});
            Ok(d)
        })
        .expect("alter on y");

    exchange(&x, &y);

    let expected: BTreeSet<RecordId> = [from_x, from_y].into_iter().collect();
    assert_eq!(record_ids(&x), expected);
    assert_eq!(record_ids(&y), expected);
    assert!(!record_ids(&x).contains(&source));

    // Idempotent under repeated merge.
    x.flush().expect("flush");
    y.flush().expect("flush");
    assert_eq!(record_ids(&x), expected);
    assert_eq!(record_ids(&y), expected);
}

#[test]
fn deletion_loses_to_alteration() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");

    let source = x.write(note(json!({"v": 0}), &[])).expect("write");
    exchange(&x, &y);

    x.delete(&source).expect("delete on x");
    let altered = y
        .alter(&source, |r| {
            let mut d = trove::RecordDraft::from(r);
            d.content = json!({"v": 1});
            Ok(d)
        })
        .expect("alter on y");

    exchange(&x, &y);

    let expected: BTreeSet<RecordId> = [altered].into_iter().collect();
    assert_eq!(record_ids(&x), expected);
    assert_eq!(record_ids(&y), expected);
}

#[test]
fn newer_label_edit_wins_in_either_merge_order() {
    for y_edits_last in [true, false] {
        let rig = Rig::new();
        let x = rig.instance("x");
        let y = rig.instance("y");

        let tree_x = x.tree(TreeName::parse("outline").expect("name"));
        let node = tree_x.add_child(&ParentRef::Root, "base").expect("add");
        exchange(&x, &y);

        let tree_y = y.tree(TreeName::parse("outline").expect("name"));
        let edit_x = |label: &str| {
            tree_x
                .alter_node(&node, |_| Ok(label.into()))
                .expect("x edit")
        };
        let edit_y = |label: &str| {
            tree_y
                .alter_node(&node, |_| Ok(label.into()))
                .expect("y edit")
        };

        if y_edits_last {
            edit_x("loser");
            std::thread::sleep(Duration::from_millis(5));
            edit_y("winner");
        } else {
            edit_y("loser");
            std::thread::sleep(Duration::from_millis(5));
            edit_x("winner");
        }

        exchange(&x, &y);

        for store in [&x, &y] {
            let nodes = walk_nodes(store, "outline");
            assert_eq!(nodes.len(), 1);
            assert_eq!(nodes[0].id, node);
            assert_eq!(nodes[0].label, "winner");
        }
    }
}

#[test]
fn label_edit_survives_concurrent_delete() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");

    let tree_x = x.tree(TreeName::parse("outline").expect("name"));
    let node = tree_x.add_child(&ParentRef::Root, "base").expect("add");
    exchange(&x, &y);

    tree_x
        .alter_node(&node, |_| Ok("A".to_string()))
        .expect("edit on x");
    y.tree(TreeName::parse("outline").expect("name"))
        .delete_node(&node)
        .expect("delete on y");

    exchange(&x, &y);

    for store in [&x, &y] {
        let nodes = walk_nodes(store, "outline");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, node);
        assert_eq!(nodes[0].label, "A");
    }
}

#[test]
fn concurrent_child_adds_interleave_by_creation_order() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");
    // Make sure both instances share the same root history first.
    exchange(&x, &y);

    let l1 = x
        .tree(TreeName::parse("outline").expect("name"))
        .add_child(&ParentRef::Root, "L1")
        .expect("add on x");
    std::thread::sleep(Duration::from_millis(5));
    let l2 = y
        .tree(TreeName::parse("outline").expect("name"))
        .add_child(&ParentRef::Root, "L2")
        .expect("add on y");

    exchange(&x, &y);

    for store in [&x, &y] {
        let nodes = walk_nodes(store, "outline");
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec![l1.clone(), l2.clone()], "no child missing, none duplicated");
        let labels: Vec<&str> = nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["L1", "L2"]);
    }
}

#[test]
fn child_added_under_concurrently_deleted_parent_is_orphaned() {
    let rig = Rig::new();
    let x = rig.instance("x");
    let y = rig.instance("y");

    let tree_x = x.tree(TreeName::parse("outline").expect("name"));
    let parent = tree_x.add_child(&ParentRef::Root, "parent").expect("add");
    exchange(&x, &y);

    // X deletes the parent while Y adds a child under it.
    tree_x.delete_node(&parent).expect("delete on x");
    y.tree(TreeName::parse("outline").expect("name"))
        .add_child(&ParentRef::Node(parent.clone()), "late child")
        .expect("add on y");

    exchange(&x, &y);

    // Orphaned, retained, unreachable: the walk sees nothing on either side.
    for store in [&x, &y] {
        assert!(walk_nodes(store, "outline").is_empty());
    }
}

#[test]
fn status_tracks_the_last_cycle() {
    let rig = Rig::new();
    let x = rig.instance("x");

    assert_eq!(x.sync_status(), SyncStatus::Idle);
    x.write(note(json!(1), &[])).expect("write");
    x.flush().expect("flush");
    assert_eq!(x.sync_status(), SyncStatus::Synced);
}

#[test]
fn repeated_flush_is_stable() {
    let rig = Rig::new();
    let x = rig.instance("x");

    x.write(note(json!(1), &[])).expect("write");
    assert_eq!(x.flush().expect("flush"), SyncOutcome::Pushed);
    assert_eq!(x.flush().expect("flush"), SyncOutcome::UpToDate);
}

#[test]
fn local_only_store_flushes_cleanly() {
    let rig = Rig::new();
    let solo = rig.local_only("solo");

    solo.write(note(json!(1), &[])).expect("write");
    assert_eq!(solo.flush().expect("flush"), SyncOutcome::UpToDate);
    assert_eq!(record_ids(&solo).len(), 1);
}
