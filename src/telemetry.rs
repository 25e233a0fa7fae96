//! Tracing setup.
//!
//! Filter comes from `TROVE_LOG` (tracing `EnvFilter` syntax), falling
//! back to the verbosity level. Embedders that install their own
//! subscriber can skip `init` entirely - the crate only emits events.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keep alive for the lifetime of the process.
pub struct TelemetryGuard {
    _private: (),
}

/// Install a stdout subscriber. 0 = warn, 1 = info, 2 = debug, 3+ = trace.
pub fn init(verbosity: u8) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("TROVE_LOG")
        .from_env_lossy();

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout);

    // try_init: a test harness or embedder may already have a subscriber.
    let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();

    TelemetryGuard { _private: () }
}

fn level_from_verbosity(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}
