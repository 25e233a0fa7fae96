//! Store operation errors.

use std::path::PathBuf;

use thiserror::Error;

use super::layout::CorruptObject;
use crate::error::{BoxError, Effect, Transience};
use crate::git::SyncError;

/// Errors from the caller-facing store surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("no stored object with id {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Corrupt(#[from] CorruptObject),

    /// A visitor or alter closure returned an error. Propagated verbatim;
    /// nothing was committed.
    #[error("aborted by caller: {0}")]
    CallerAborted(#[source] BoxError),

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to read store snapshot: {0}")]
    Read(#[source] git2::Error),

    #[error("failed to commit mutation: {0}")]
    Commit(#[source] git2::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("sync worker is not running")]
    WorkerGone,
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Sync(e) => e.transience(),
            StoreError::NotFound { .. }
            | StoreError::Corrupt(_)
            | StoreError::CallerAborted(_)
            | StoreError::Config { .. }
            | StoreError::OpenRepo(_, _)
            | StoreError::Read(_)
            | StoreError::Commit(_)
            | StoreError::WorkerGone => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Sync(e) => e.effect(),
            // Mutations move the store ref last; an error means no commit.
            _ => Effect::None,
        }
    }
}
