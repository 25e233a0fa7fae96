//! Conflict resolution policy.
//!
//! Invoked per overlapping path when the generic tree merge reports that
//! both histories touched the same storage object since their common
//! ancestor. Structurally impossible for independent adds (one object per
//! entity), so only two cases carry real logic:
//! - tree nodes edited on both sides: newer `updated_at` wins
//! - tree node edited on one side, deleted on the other: the edit wins
//!
//! The resolver is a pure function of the three object states. It never
//! reads the clock, so resolving A-then-B and B-then-A yields identical
//! bytes on every replica.

use super::error::SyncError;
use crate::store::layout::{classify_path, decode_node, ObjectNamespace};

/// Outcome for one conflicting path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Path survives with exactly these bytes.
    Keep(Vec<u8>),
    /// Path is absent from the merged tree.
    Delete,
}

/// Resolve one conflicting path.
///
/// `ancestor`/`ours`/`theirs` are the object bytes at the merge base and
/// on each side; `None` means the side deleted (or never had) the object.
pub fn resolve(
    path: &str,
    ancestor: Option<&[u8]>,
    ours: Option<&[u8]>,
    theirs: Option<&[u8]>,
) -> Result<Resolution, SyncError> {
    let namespace = classify_path(path).ok_or_else(|| SyncError::ConflictUnresolved {
        path: path.to_string(),
    })?;

    match (ours, theirs) {
        // Both sides deleted: idempotent.
        (None, None) => Ok(Resolution::Delete),

        // One side deleted, the other kept the object.
        (Some(kept), None) | (None, Some(kept)) => {
            if Some(kept) == ancestor {
                // Unchanged on the keeping side: plain deletion stands.
                return Ok(Resolution::Delete);
            }
            match namespace {
                // Label edit vs delete: the edit wins, the node is
                // reconstructed from the editing side.
                ObjectNamespace::Node => Ok(Resolution::Keep(kept.to_vec())),
                // Records are immutable snapshots; a rewrite under an
                // existing id cannot be produced by any operation.
                ObjectNamespace::Record => Err(SyncError::ConflictUnresolved {
                    path: path.to_string(),
                }),
            }
        }

        (Some(ours), Some(theirs)) => {
            if ours == theirs {
                return Ok(Resolution::Keep(ours.to_vec()));
            }
            match namespace {
                ObjectNamespace::Record => Err(SyncError::ConflictUnresolved {
                    path: path.to_string(),
                }),
                ObjectNamespace::Node => resolve_node_edit(path, ours, theirs),
            }
        }
    }
}

/// Concurrent edits to the same node object.
///
/// Greater `updated_at` wins. Stamps recorded at mutation time can tie;
/// both variants then carry the same id (same path), so the remaining
/// total order is the canonical encoding itself: the lexicographically
/// smaller bytes win. Either way the choice is side-independent.
fn resolve_node_edit(path: &str, ours: &[u8], theirs: &[u8]) -> Result<Resolution, SyncError> {
    let our_node = decode_node(path, ours)?;
    let their_node = decode_node(path, theirs)?;

    let winner = match our_node.updated_at.cmp(&their_node.updated_at) {
        std::cmp::Ordering::Greater => ours,
        std::cmp::Ordering::Less => theirs,
        std::cmp::Ordering::Equal => {
            if ours <= theirs {
                ours
            } else {
                theirs
            }
        }
    };

    Ok(Resolution::Keep(winner.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParentRef, TreeNode, WallClock};
    use crate::store::layout::encode_node;

    fn node_bytes(node: &TreeNode) -> Vec<u8> {
        encode_node(node)
    }

    fn sample_node(label: &str, updated_ms: u64) -> TreeNode {
        let mut node = TreeNode::create(label.into(), ParentRef::Root, WallClock(100));
        node.updated_at = WallClock(updated_ms);
        node
    }

    #[test]
    fn newer_label_edit_wins() {
        let base = sample_node("base", 100);
        let older = base.relabeled("older".into(), WallClock(200));
        let newer = base.relabeled("newer".into(), WallClock(300));

        let path = "tree/outline/x.json";
        let a = node_bytes(&base);
        let o = node_bytes(&older);
        let n = node_bytes(&newer);

        let forward = resolve(path, Some(&a), Some(&o), Some(&n)).unwrap();
        let reverse = resolve(path, Some(&a), Some(&n), Some(&o)).unwrap();
        assert_eq!(forward, Resolution::Keep(n.clone()));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn equal_stamps_resolve_identically_from_both_sides() {
        let base = sample_node("base", 100);
        let x = base.relabeled("aaa".into(), WallClock(200));
        let y = base.relabeled("bbb".into(), WallClock(200));

        let path = "tree/outline/x.json";
        let a = node_bytes(&base);
        let xb = node_bytes(&x);
        let yb = node_bytes(&y);

        let forward = resolve(path, Some(&a), Some(&xb), Some(&yb)).unwrap();
        let reverse = resolve(path, Some(&a), Some(&yb), Some(&xb)).unwrap();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn edit_beats_delete() {
        let base = sample_node("base", 100);
        let edited = base.relabeled("survives".into(), WallClock(200));

        let path = "tree/outline/x.json";
        let a = node_bytes(&base);
        let e = node_bytes(&edited);

        let edit_local = resolve(path, Some(&a), Some(&e), None).unwrap();
        let edit_remote = resolve(path, Some(&a), None, Some(&e)).unwrap();
        assert_eq!(edit_local, Resolution::Keep(e.clone()));
        assert_eq!(edit_local, edit_remote);
    }

    #[test]
    fn plain_delete_stands_when_other_side_unchanged() {
        let base = sample_node("base", 100);
        let path = "tree/outline/x.json";
        let a = node_bytes(&base);

        let res = resolve(path, Some(&a), Some(&a), None).unwrap();
        assert_eq!(res, Resolution::Delete);
    }

    #[test]
    fn both_deleted_is_idempotent() {
        let base = sample_node("base", 100);
        let a = node_bytes(&base);
        let res = resolve("tree/outline/x.json", Some(&a), None, None).unwrap();
        assert_eq!(res, Resolution::Delete);
    }

    #[test]
    fn record_rewrite_is_a_defect() {
        let path = "data/note/x.json";
        let a = br#"{"v":1}"#.to_vec();
        let b = br#"{"v":2}"#.to_vec();
        assert!(matches!(
            resolve(path, Some(&a), Some(&a), Some(&b)),
            Err(SyncError::ConflictUnresolved { .. })
        ));
    }

    #[test]
    fn unknown_namespace_is_a_defect() {
        assert!(matches!(
            resolve("meta/x.json", None, Some(b"a"), Some(b"b")),
            Err(SyncError::ConflictUnresolved { .. })
        ));
    }
}
