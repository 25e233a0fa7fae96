//! Query and walk over a committed snapshot.
//!
//! Every call resolves the store ref once and reads only that commit's
//! tree: reads never observe a half-built commit and never take the
//! write lock.

use std::collections::HashMap;

use git2::{ObjectType, Oid, Repository, Tree};

use super::error::StoreError;
use super::layout::{self, ObjectPath, DATA_ROOT, TREE_ROOT};
use crate::core::{NodeId, ParentRef, Record, RecordFilter, RecordId, TreeName, TreeNode};
use crate::error::BoxError;
use crate::git::STORE_REF;

/// Resolve the store ref to its commit tree - the read snapshot.
pub(crate) fn head_tree(repo: &Repository) -> Result<Tree<'_>, StoreError> {
    let oid = repo.refname_to_id(STORE_REF).map_err(StoreError::Read)?;
    repo.find_commit(oid)
        .and_then(|c| c.tree())
        .map_err(StoreError::Read)
}

fn subtree<'r>(
    repo: &'r Repository,
    parent: &Tree<'_>,
    name: &str,
) -> Result<Option<Tree<'r>>, StoreError> {
    match parent.get_name(name) {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
            Ok(Some(repo.find_tree(entry.id()).map_err(StoreError::Read)?))
        }
        _ => Ok(None),
    }
}

fn blob_bytes(repo: &Repository, oid: Oid) -> Result<Vec<u8>, StoreError> {
    Ok(repo
        .find_blob(oid)
        .map_err(StoreError::Read)?
        .content()
        .to_vec())
}

/// Iterate records matching `filter`, in unspecified order.
///
/// A visitor error aborts iteration and propagates as `CallerAborted`.
pub(crate) fn each(
    repo: &Repository,
    filter: &RecordFilter,
    visitor: &mut dyn FnMut(Record) -> Result<(), BoxError>,
) -> Result<(), StoreError> {
    let top = head_tree(repo)?;
    let data = match subtree(repo, &top, DATA_ROOT)? {
        Some(t) => t,
        None => return Ok(()),
    };

    let groups: Vec<String> = match filter.kind {
        // Kind filter narrows to one group without touching the others.
        Some(ref kind) => {
            if data.get_name(kind.as_str()).is_some() {
                vec![kind.as_str().to_string()]
            } else {
                Vec::new()
            }
        }
        None => data
            .iter()
            .filter(|e| e.kind() == Some(ObjectType::Tree))
            .filter_map(|e| e.name().map(str::to_string))
            .collect(),
    };

    for group in groups {
        let group_tree = match subtree(repo, &data, &group)? {
            Some(t) => t,
            None => continue,
        };
        for entry in group_tree.iter() {
            if entry.kind() != Some(ObjectType::Blob) {
                continue;
            }
            let file = match entry.name() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let path = format!("{DATA_ROOT}/{group}/{file}");
            let bytes = blob_bytes(repo, entry.id())?;
            let record = layout::decode_record(&path, &bytes)?;
            if !filter.matches(&record) {
                continue;
            }
            visitor(record).map_err(StoreError::CallerAborted)?;
        }
    }

    Ok(())
}

/// Load every node of a named tree from the snapshot.
pub(crate) fn load_nodes(
    repo: &Repository,
    tree_name: &TreeName,
) -> Result<Vec<TreeNode>, StoreError> {
    let top = head_tree(repo)?;
    let trees = match subtree(repo, &top, TREE_ROOT)? {
        Some(t) => t,
        None => return Ok(Vec::new()),
    };
    let group = match subtree(repo, &trees, tree_name.as_str())? {
        Some(t) => t,
        None => return Ok(Vec::new()),
    };

    let mut nodes = Vec::new();
    for entry in group.iter() {
        if entry.kind() != Some(ObjectType::Blob) {
            continue;
        }
        let file = match entry.name() {
            Some(n) => n.to_string(),
            None => continue,
        };
        let path = format!("{TREE_ROOT}/{}/{file}", tree_name.as_str());
        let bytes = blob_bytes(repo, entry.id())?;
        nodes.push(layout::decode_node(&path, &bytes)?);
    }
    Ok(nodes)
}

/// Depth-first pre-order traversal from the root sentinel.
///
/// Children are derived from `parent` and visited in ascending
/// `(created_at, id)` order before descending into each child's subtree.
/// Nodes whose parent was deleted are unreachable and stay unvisited.
pub(crate) fn walk(
    repo: &Repository,
    tree_name: &TreeName,
    visitor: &mut dyn FnMut(&TreeNode, usize) -> Result<(), BoxError>,
) -> Result<(), StoreError> {
    let nodes = load_nodes(repo, tree_name)?;

    let mut children: HashMap<ParentRef, Vec<TreeNode>> = HashMap::new();
    for node in nodes {
        children.entry(node.parent.clone()).or_default().push(node);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    fn descend(
        children: &HashMap<ParentRef, Vec<TreeNode>>,
        at: &ParentRef,
        depth: usize,
        visitor: &mut dyn FnMut(&TreeNode, usize) -> Result<(), BoxError>,
    ) -> Result<(), StoreError> {
        if let Some(siblings) = children.get(at) {
            for node in siblings {
                visitor(node, depth).map_err(StoreError::CallerAborted)?;
                descend(
                    children,
                    &ParentRef::Node(node.id.clone()),
                    depth + 1,
                    visitor,
                )?;
            }
        }
        Ok(())
    }

    descend(&children, &ParentRef::Root, 0, visitor)
}

/// Locate a record by id, scanning the kind groups.
pub(crate) fn find_record(
    repo: &Repository,
    top: &Tree<'_>,
    id: &RecordId,
) -> Result<Option<(Record, ObjectPath)>, StoreError> {
    let data = match subtree(repo, top, DATA_ROOT)? {
        Some(t) => t,
        None => return Ok(None),
    };

    let file = format!("{}.json", id.as_str());
    for entry in data.iter() {
        if entry.kind() != Some(ObjectType::Tree) {
            continue;
        }
        let group = match entry.name() {
            Some(n) => n.to_string(),
            None => continue,
        };
        let group_tree = match subtree(repo, &data, &group)? {
            Some(t) => t,
            None => continue,
        };
        let found = group_tree.get_name(&file);
        if let Some(found) = found {
            let path = format!("{DATA_ROOT}/{group}/{file}");
            let bytes = blob_bytes(repo, found.id())?;
            let record = layout::decode_record(&path, &bytes)?;
            let object_path = ObjectPath::record(&record.kind, id);
            return Ok(Some((record, object_path)));
        }
    }
    Ok(None)
}

/// Load one node by id from a named tree.
pub(crate) fn get_node(
    repo: &Repository,
    top: &Tree<'_>,
    tree_name: &TreeName,
    id: &NodeId,
) -> Result<Option<TreeNode>, StoreError> {
    let trees = match subtree(repo, top, TREE_ROOT)? {
        Some(t) => t,
        None => return Ok(None),
    };
    let group = match subtree(repo, &trees, tree_name.as_str())? {
        Some(t) => t,
        None => return Ok(None),
    };

    let file = format!("{}.json", id.as_str());
    let found = group.get_name(&file);
    match found {
        Some(entry) => {
            let path = format!("{TREE_ROOT}/{}/{file}", tree_name.as_str());
            let bytes = blob_bytes(repo, entry.id())?;
            Ok(Some(layout::decode_node(&path, &bytes)?))
        }
        None => Ok(None),
    }
}
