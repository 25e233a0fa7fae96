//! Mutation log: one logical operation, one commit.
//!
//! Commits are built with the treebuilder against the current store ref
//! tree - no filesystem worktree. The ref moves last, via compare-and-swap,
//! so a failed operation leaves the previous commit as the store state.
//! The only writer racing a mutation is the sync worker landing a merge;
//! on a lost swap the change set is re-applied against the new tip.

use git2::{Oid, Repository, Signature, Tree};

use super::error::StoreError;
use super::layout::ObjectPath;
use crate::config::AuthorConfig;
use crate::core::WallClock;
use crate::git::STORE_REF;

const COMMIT_PREFIX: &str = "trove(store):";

/// Retries against the sync worker moving the ref mid-commit.
const REF_RACE_RETRIES: usize = 5;

/// One path-level edit inside a commit.
pub(crate) enum Change {
    Put { path: ObjectPath, bytes: Vec<u8> },
    Remove { path: ObjectPath },
}

/// Machine-readable description of the operation, carried in the commit
/// message for diagnosis. Correctness never parses it back.
pub(crate) struct OpDescriptor {
    pub kind: &'static str,
    pub entity: &'static str,
    pub ids: Vec<String>,
    pub at: WallClock,
}

impl OpDescriptor {
    pub fn new(kind: &'static str, entity: &'static str, at: WallClock) -> Self {
        Self {
            kind,
            entity,
            ids: Vec::new(),
            at,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Subject line plus an `Op:` trailer:
    ///
    /// ```text
    /// trove(store): write record 0189…
    ///
    /// Op: {"kind":"write","entity":"record","ids":["0189…"],"at":1722…}
    /// ```
    pub fn to_commit_message(&self) -> String {
        let subject = format!(
            "{COMMIT_PREFIX} {} {} {}",
            self.kind,
            self.entity,
            self.ids.join(" ")
        );
        let ids_json: Vec<String> = self.ids.iter().map(|id| format!("{id:?}")).collect();
        let trailer = format!(
            "Op: {{\"kind\":\"{}\",\"entity\":\"{}\",\"ids\":[{}],\"at\":{}}}",
            self.kind,
            self.entity,
            ids_json.join(","),
            self.at.as_millis()
        );
        format!("{subject}\n\n{trailer}")
    }
}

/// Apply one operation's change set as a single commit on the store ref.
///
/// Returns the new tip. All-or-nothing: any failure leaves the ref where
/// it was.
pub(crate) fn commit_op(
    repo: &Repository,
    author: &AuthorConfig,
    changes: &[Change],
    descriptor: &OpDescriptor,
) -> Result<Oid, StoreError> {
    let message = descriptor.to_commit_message();
    let sig =
        Signature::now(&author.name, &author.email).map_err(StoreError::Commit)?;

    let mut attempts = 0;
    loop {
        let tip = repo.refname_to_id(STORE_REF).map_err(StoreError::Read)?;
        let tip_commit = repo.find_commit(tip).map_err(StoreError::Read)?;
        let mut tree = tip_commit.tree().map_err(StoreError::Read)?;

        for change in changes {
            let next = match change {
                Change::Put { path, bytes } => {
                    let blob = repo.blob(bytes).map_err(StoreError::Commit)?;
                    edit_object(repo, &tree, path, Some(blob))?
                }
                Change::Remove { path } => edit_object(repo, &tree, path, None)?,
            };
            tree = repo.find_tree(next).map_err(StoreError::Commit)?;
        }

        let commit_oid = repo
            .commit(None, &sig, &sig, &message, &tree, &[&tip_commit])
            .map_err(StoreError::Commit)?;

        match repo.reference_matching(STORE_REF, commit_oid, true, tip, &message) {
            Ok(_) => {
                tracing::debug!(op = descriptor.kind, entity = descriptor.entity, "committed mutation");
                return Ok(commit_oid);
            }
            Err(e) => {
                let moved = repo
                    .refname_to_id(STORE_REF)
                    .map(|now| now != tip)
                    .unwrap_or(false);
                if !moved {
                    return Err(StoreError::Commit(e));
                }
                // Sync worker landed a merge between our read and swap.
                attempts += 1;
                if attempts > REF_RACE_RETRIES {
                    return Err(StoreError::Commit(e));
                }
                continue;
            }
        }
    }
}

/// Rewrite the fixed two-level object path inside the snapshot tree,
/// pruning group and root trees that become empty.
fn edit_object(
    repo: &Repository,
    top: &Tree<'_>,
    path: &ObjectPath,
    blob: Option<Oid>,
) -> Result<Oid, StoreError> {
    let git = StoreError::Commit;

    let root_tree = match top.get_name(path.root) {
        Some(entry) => Some(repo.find_tree(entry.id()).map_err(git)?),
        None => None,
    };
    let group_tree = match root_tree
        .as_ref()
        .and_then(|t| t.get_name(&path.group))
    {
        Some(entry) => Some(repo.find_tree(entry.id()).map_err(git)?),
        None => None,
    };

    let mut group_builder = repo.treebuilder(group_tree.as_ref()).map_err(git)?;
    match blob {
        Some(oid) => {
            group_builder
                .insert(path.file.as_str(), oid, 0o100_644)
                .map_err(git)?;
        }
        None => {
            // Removal is tolerant: a concurrent merge may already have
            // dropped the object.
            if group_builder.get(path.file.as_str()).map_err(git)?.is_some() {
                group_builder.remove(path.file.as_str()).map_err(git)?;
            }
        }
    }
    let group_oid = group_builder.write().map_err(git)?;
    let group_empty = group_builder.len() == 0;

    let mut root_builder = repo.treebuilder(root_tree.as_ref()).map_err(git)?;
    if group_empty {
        if root_builder.get(path.group.as_str()).map_err(git)?.is_some() {
            root_builder.remove(path.group.as_str()).map_err(git)?;
        }
    } else {
        root_builder
            .insert(path.group.as_str(), group_oid, 0o040_000)
            .map_err(git)?;
    }
    let root_oid = root_builder.write().map_err(git)?;
    let root_empty = root_builder.len() == 0;

    let mut top_builder = repo.treebuilder(Some(top)).map_err(git)?;
    if root_empty {
        if top_builder.get(path.root).map_err(git)?.is_some() {
            top_builder.remove(path.root).map_err(git)?;
        }
    } else {
        top_builder
            .insert(path.root, root_oid, 0o040_000)
            .map_err(git)?;
    }
    top_builder.write().map_err(git)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_message_shape() {
        let d = OpDescriptor::new("write", "record", WallClock(1234))
            .with_id("aaaa")
            .with_id("bbbb");
        let msg = d.to_commit_message();
        let mut lines = msg.lines();
        assert_eq!(lines.next(), Some("trove(store): write record aaaa bbbb"));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(
            lines.next(),
            Some("Op: {\"kind\":\"write\",\"entity\":\"record\",\"ids\":[\"aaaa\",\"bbbb\"],\"at\":1234}")
        );
    }
}
