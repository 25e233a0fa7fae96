//! Core capability errors (parsing, validation).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid identifier or name.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("record id `{raw}` is invalid: {reason}")]
    Record { raw: String, reason: String },
    #[error("node id `{raw}` is invalid: {reason}")]
    Node { raw: String, reason: String },
    #[error("record kind `{raw}` is invalid: {reason}")]
    Kind { raw: String, reason: String },
    #[error("tree name `{raw}` is invalid: {reason}")]
    Tree { raw: String, reason: String },
    #[error("tag `{raw}` is invalid: {reason}")]
    Tag { raw: String, reason: String },
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
