//! Git sync error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::store::layout::CorruptObject;

/// Errors that can occur during git sync operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to fetch from remote: {0}")]
    Fetch(#[source] git2::Error),

    #[error("local ref not found: {0}")]
    NoLocalRef(String),

    #[error("failed to write blob: {0}")]
    WriteBlob(#[source] git2::Error),

    #[error("failed to build tree: {0}")]
    BuildTree(#[source] git2::Error),

    #[error("failed to create commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("push rejected (non-fast-forward)")]
    NonFastForward,

    #[error("failed to push: {0}")]
    Push(#[source] git2::Error),

    #[error(transparent)]
    PushRejected(#[from] PushRejected),

    #[error("local store ref advanced during sync")]
    LocalMoved,

    #[error("too many sync retries ({0})")]
    TooManyRetries(usize),

    #[error("merge conflict at {path} could not be resolved")]
    ConflictUnresolved { path: String },

    #[error(transparent)]
    Corrupt(#[from] CorruptObject),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl SyncError {
    /// Whether retrying this sync may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            SyncError::Fetch(_)
            | SyncError::NonFastForward
            | SyncError::Push(_)
            | SyncError::PushRejected(_)
            | SyncError::LocalMoved
            | SyncError::TooManyRetries(_) => Transience::Retryable,

            SyncError::OpenRepo(_, _)
            | SyncError::NoLocalRef(_)
            | SyncError::WriteBlob(_)
            | SyncError::BuildTree(_)
            | SyncError::Commit(_)
            | SyncError::ConflictUnresolved { .. }
            | SyncError::Corrupt(_)
            | SyncError::Git(_) => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Push-phase errors occur after a local merge commit landed.
            SyncError::NonFastForward
            | SyncError::Push(_)
            | SyncError::PushRejected(_)
            | SyncError::TooManyRetries(_) => Effect::Some,

            // Low-level git2 errors can happen at any phase.
            SyncError::Git(_) => Effect::Unknown,

            // Everything else fails before the merge result is committed.
            _ => Effect::None,
        }
    }
}

/// Push was rejected by the remote with a status message.
#[derive(Error, Debug)]
#[error("push rejected: {message}")]
pub struct PushRejected {
    pub message: String,
}
