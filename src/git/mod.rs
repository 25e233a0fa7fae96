//! Git integration module.
//!
//! Provides:
//! - Sync typestate machine (Idle → Fetched → Merged → Committed)
//! - Conflict resolution policy for overlapping storage objects
//! - Store ref bootstrap

pub mod error;
pub mod resolve;
pub mod sync;

pub use error::{PushRejected, SyncError};
pub use resolve::{resolve, Resolution};
pub use sync::{
    init_store_ref, sync_with_retry, MergeDiff, SyncOutcome, SyncProcess, REMOTE_NAME,
    REMOTE_TRACKING_REF, STORE_REF,
};
