#![forbid(unsafe_code)]

//! trove - a replicated record/tree store over git history.
//!
//! Independent instances commit locally and exchange history through a
//! shared remote; divergent histories reconcile through a deterministic
//! per-object resolution policy, so all replicas converge without
//! central coordination.

pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use error::{BoxError, Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at crate root for convenience
pub use crate::config::{AuthorConfig, Config, SyncConfig, SyncMode};
pub use crate::core::{
    NodeId, ParentRef, Record, RecordDraft, RecordFilter, RecordId, RecordKind, Tag, TreeName,
    TreeNode, WallClock,
};
pub use crate::git::{MergeDiff, SyncError, SyncOutcome};
pub use crate::store::{Store, StoreError, StoreOptions, TreeHandle};
pub use crate::sync::SyncStatus;
