use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `EVSYNC_LOG` first, then `RUST_LOG`,
/// then a default.
///
/// Log field contract for evsync processes:
/// - Always include `group_id` on run-scoped spans.
/// - Include `topic` and `partition` on any flow-control (pause/resume) or
///   dispatch event.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("EVSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
