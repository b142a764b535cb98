//! Logging/tracing setup.
//!
//! Mirrors the teacher's `main.rs` initialization of `env_logger` plus the
//! richer `tracing-subscriber` setup used by `enterprise::tracing`, scaled
//! down to what an index/node binary needs: one global subscriber honoring
//! `log.level` (spec.md §6.3) or `RUST_LOG`.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

pub fn init(level: LogLevel) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_filter_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
