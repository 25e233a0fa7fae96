//! The TreeNode - a labeled node with stable identity.
//!
//! Unlike records, nodes mutate in place: a relabel keeps the id and
//! refreshes `updated_at`, which is the tie-break for concurrent edits.
//! Children are derived at read time from `parent`, never stored.

use super::identity::{NodeId, ParentRef};
use super::time::WallClock;

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub label: String,
    /// Immutable - nodes are never re-parented.
    pub parent: ParentRef,
    pub created_at: WallClock,
    /// Refreshed on every label mutation.
    pub updated_at: WallClock,
}

impl TreeNode {
    pub(crate) fn create(label: String, parent: ParentRef, at: WallClock) -> Self {
        Self {
            id: NodeId::generate(),
            label,
            parent,
            created_at: at,
            updated_at: at,
        }
    }

    /// In-place relabel: same id, refreshed `updated_at`.
    pub(crate) fn relabeled(&self, label: String, at: WallClock) -> Self {
        Self {
            id: self.id.clone(),
            label,
            parent: self.parent.clone(),
            created_at: self.created_at,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relabel_keeps_identity() {
        let n = TreeNode::create("old".into(), ParentRef::Root, WallClock(10));
        let m = n.relabeled("new".into(), WallClock(20));
        assert_eq!(m.id, n.id);
        assert_eq!(m.created_at, n.created_at);
        assert_eq!(m.label, "new");
        assert_eq!(m.updated_at, WallClock(20));
    }
}
