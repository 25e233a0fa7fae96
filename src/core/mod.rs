//! Domain model: identity atoms, time, records and tree nodes.

mod error;
mod identity;
mod node;
mod record;
mod time;

pub use error::{CoreError, InvalidId};
pub use identity::{NodeId, ParentRef, RecordId, RecordKind, Tag, TreeName};
pub use node::TreeNode;
pub use record::{Record, RecordDraft, RecordFilter};
pub use time::WallClock;
