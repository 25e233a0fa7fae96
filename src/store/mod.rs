//! The store handle - caller surface over the reconciliation engine.
//!
//! One `Store` per local working copy, with an explicit open/close
//! lifecycle. Mutations serialize under a single internal write lock held
//! for the duration of one commit; queries read the last committed
//! snapshot through a separate repository handle and never wait on
//! writers. Sync runs on its own thread and never blocks either.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use git2::Repository;

pub mod error;
pub mod layout;
mod log;
mod query;

pub use error::StoreError;

use crate::config::{self, Config, SyncMode};
use crate::core::{
    NodeId, ParentRef, Record, RecordDraft, RecordFilter, RecordId, TreeName, TreeNode, WallClock,
};
use crate::error::BoxError;
use crate::git::{init_store_ref, SyncOutcome};
use crate::sync::worker::{self, SyncStatus, WorkerHandle};
use layout::ObjectPath;
use log::{commit_op, Change, OpDescriptor};

/// How to open a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    path: PathBuf,
    config: Option<Config>,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: None,
        }
    }

    /// Override the on-disk config (tests, embedders).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }
}

/// One running instance of the engine.
pub struct Store {
    path: PathBuf,
    config: Config,
    /// The single local write lock: mutations serialize here.
    write: Mutex<Repository>,
    /// Snapshot reads go through their own handle, never the write lock.
    read: Mutex<Repository>,
    worker: WorkerHandle,
}

fn lock(m: &Mutex<Repository>) -> MutexGuard<'_, Repository> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Store {
    /// Open (or initialize) the store at a path and spawn its sync worker.
    ///
    /// Ensures the store ref exists, adopting the remote's history when
    /// the remote already has one - racing initializers retry until one
    /// side's orphan commit wins.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let path = options.path;
        let config = options
            .config
            .unwrap_or_else(|| config::load_or_init(&path));

        let repo = match Repository::open(&path) {
            Ok(r) => r,
            Err(_) => {
                Repository::init(&path).map_err(|e| StoreError::OpenRepo(path.clone(), e))?
            }
        };
        init_store_ref(&repo, &config.author, config.sync.max_retries)?;

        let read =
            Repository::open(&path).map_err(|e| StoreError::OpenRepo(path.clone(), e))?;
        let worker = worker::spawn(path.clone(), config.clone());

        let store = Self {
            path,
            config,
            write: Mutex::new(repo),
            read: Mutex::new(read),
            worker,
        };
        // Pick up remote history soon after opening.
        if store.config.sync.mode == SyncMode::Auto {
            store.worker.nudge();
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shut down the sync worker and release the handles.
    ///
    /// Dropping the store does the same; `close` just makes the lifecycle
    /// explicit at call sites.
    pub fn close(self) {}

    // =========================================================================
    // Records
    // =========================================================================

    /// Create a record. Returns its freshly assigned id.
    pub fn write(&self, draft: RecordDraft) -> Result<RecordId, StoreError> {
        let record = Record::from_draft(draft, WallClock::now());
        let path = ObjectPath::record(&record.kind, &record.id);
        let bytes = layout::encode_record(&record);
        let descriptor = OpDescriptor::new("write", "record", record.created_at)
            .with_id(record.id.as_str());

        {
            let repo = lock(&self.write);
            commit_op(
                &repo,
                &self.config.author,
                &[Change::Put { path, bytes }],
                &descriptor,
            )?;
        }
        self.nudge();
        Ok(record.id)
    }

    /// Iterate records matching `filter`, in unspecified order.
    ///
    /// The visitor signals early termination by returning an error, which
    /// comes back as `CallerAborted` - a stop, not a fault.
    pub fn each<F>(&self, filter: &RecordFilter, mut visitor: F) -> Result<(), StoreError>
    where
        F: FnMut(Record) -> Result<(), BoxError>,
    {
        let repo = lock(&self.read);
        query::each(&repo, filter, &mut visitor)
    }

    /// Replace a record: the closure sees the current value and returns
    /// the replacement draft. The replacement is a brand-new record (new
    /// id, new `created_at`); the old object is deleted in the same
    /// commit. A closure error aborts with nothing committed.
    pub fn alter<F>(&self, id: &RecordId, f: F) -> Result<RecordId, StoreError>
    where
        F: FnOnce(&Record) -> Result<RecordDraft, BoxError>,
    {
        let repo = lock(&self.write);
        let (old, old_path) = {
            let top = query::head_tree(&repo)?;
            query::find_record(&repo, &top, id)?.ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
            })?
        };

        let draft = f(&old).map_err(StoreError::CallerAborted)?;
        let now = WallClock::now();
        let replacement = Record::from_draft(draft, now);
        let new_id = replacement.id.clone();
        let new_path = ObjectPath::record(&replacement.kind, &replacement.id);
        let bytes = layout::encode_record(&replacement);
        let descriptor = OpDescriptor::new("alter", "record", now)
            .with_id(id.as_str())
            .with_id(new_id.as_str());

        commit_op(
            &repo,
            &self.config.author,
            &[
                Change::Remove { path: old_path },
                Change::Put {
                    path: new_path,
                    bytes,
                },
            ],
            &descriptor,
        )?;
        drop(repo);
        self.nudge();
        Ok(new_id)
    }

    /// Delete a record by id.
    pub fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
        let repo = lock(&self.write);
        let (_, path) = {
            let top = query::head_tree(&repo)?;
            query::find_record(&repo, &top, id)?.ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
            })?
        };

        let descriptor =
            OpDescriptor::new("delete", "record", WallClock::now()).with_id(id.as_str());
        commit_op(
            &repo,
            &self.config.author,
            &[Change::Remove { path }],
            &descriptor,
        )?;
        drop(repo);
        self.nudge();
        Ok(())
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// Handle on a named tree.
    pub fn tree(&self, name: TreeName) -> TreeHandle<'_> {
        TreeHandle { store: self, name }
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Force a sync cycle now and block until it completes or fails.
    /// Local state stays valid either way.
    pub fn flush(&self) -> Result<SyncOutcome, StoreError> {
        self.worker.flush()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.worker.status()
    }

    fn nudge(&self) {
        if self.config.sync.mode == SyncMode::Auto {
            self.worker.nudge();
        }
    }
}

/// Handle on one named tree of a store.
pub struct TreeHandle<'s> {
    store: &'s Store,
    name: TreeName,
}

impl TreeHandle<'_> {
    pub fn name(&self) -> &TreeName {
        &self.name
    }

    /// Depth-first pre-order traversal from the root sentinel; children
    /// visit in ascending `(created_at, id)` order. The visitor receives
    /// each node and its depth (root children are depth 0); its error
    /// aborts the rest of the traversal.
    pub fn walk<F>(&self, mut visitor: F) -> Result<(), StoreError>
    where
        F: FnMut(&TreeNode, usize) -> Result<(), BoxError>,
    {
        let repo = lock(&self.store.read);
        query::walk(&repo, &self.name, &mut visitor)
    }

    /// Add a node under `parent` (the root sentinel or an existing node).
    pub fn add_child(
        &self,
        parent: &ParentRef,
        label: impl Into<String>,
    ) -> Result<NodeId, StoreError> {
        let repo = lock(&self.store.write);
        if let ParentRef::Node(pid) = parent {
            let top = query::head_tree(&repo)?;
            if query::get_node(&repo, &top, &self.name, pid)?.is_none() {
                return Err(StoreError::NotFound {
                    id: pid.to_string(),
                });
            }
        }

        let node = TreeNode::create(label.into(), parent.clone(), WallClock::now());
        let id = node.id.clone();
        let path = ObjectPath::node(&self.name, &node.id);
        let bytes = layout::encode_node(&node);
        let descriptor =
            OpDescriptor::new("add-child", "node", node.created_at).with_id(id.as_str());

        commit_op(
            &repo,
            &self.store.config.author,
            &[Change::Put { path, bytes }],
            &descriptor,
        )?;
        drop(repo);
        self.store.nudge();
        Ok(id)
    }

    /// Relabel a node in place: same id, refreshed `updated_at`. The
    /// closure sees the current node and returns the new label.
    pub fn alter_node<F>(&self, id: &NodeId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&TreeNode) -> Result<String, BoxError>,
    {
        let repo = lock(&self.store.write);
        let node = {
            let top = query::head_tree(&repo)?;
            query::get_node(&repo, &top, &self.name, id)?.ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
            })?
        };

        let label = f(&node).map_err(StoreError::CallerAborted)?;
        let now = WallClock::now();
        let updated = node.relabeled(label, now);
        let path = ObjectPath::node(&self.name, id);
        let bytes = layout::encode_node(&updated);
        let descriptor = OpDescriptor::new("alter-node", "node", now).with_id(id.as_str());

        commit_op(
            &repo,
            &self.store.config.author,
            &[Change::Put { path, bytes }],
            &descriptor,
        )?;
        drop(repo);
        self.store.nudge();
        Ok(())
    }

    /// Delete a node. Children are untouched: they become unreachable
    /// from `walk` but stay in storage.
    pub fn delete_node(&self, id: &NodeId) -> Result<(), StoreError> {
        let repo = lock(&self.store.write);
        {
            let top = query::head_tree(&repo)?;
            if query::get_node(&repo, &top, &self.name, id)?.is_none() {
                return Err(StoreError::NotFound {
                    id: id.to_string(),
                });
            }
        }

        let path = ObjectPath::node(&self.name, id);
        let descriptor =
            OpDescriptor::new("delete-node", "node", WallClock::now()).with_id(id.as_str());
        commit_op(
            &repo,
            &self.store.config.author,
            &[Change::Remove { path }],
            &descriptor,
        )?;
        drop(repo);
        self.store.nudge();
        Ok(())
    }
}
