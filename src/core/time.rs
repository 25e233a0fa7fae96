//! Time primitives.
//!
//! WallClock millisecond timestamps recorded at mutation time.
//! All merge-time ordering decisions compare recorded stamps only;
//! nothing reads the clock during a merge.

use serde::{Deserialize, Serialize};

/// Wall clock in milliseconds since the Unix epoch.
///
/// Copy is fine here - it's just a measurement. Ties between concurrent
/// writers are broken downstream by id or canonical byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}
