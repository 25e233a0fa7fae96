use thiserror::Error;

use crate::core::CoreError;
use crate::git::SyncError;
use crate::store::StoreError;

/// Error type carried by visitor and alter closures.
///
/// Propagated verbatim inside `StoreError::CallerAborted`; the engine
/// never interprets it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Whether retrying the failed operation can succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retrying never helps without changing inputs/state.
    Permanent,
    /// Retrying may help (contention, remote outage).
    Retryable,
    /// Unknown whether a retry helps.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What is known about side effects at the point an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// No side effects occurred.
    None,
    /// Side effects occurred, locally or remotely.
    Some,
    /// Cannot tell whether side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the canonical per-capability errors, not a grab-bag.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Sync(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::Store(e) => e.effect(),
            Error::Sync(e) => e.effect(),
        }
    }
}
