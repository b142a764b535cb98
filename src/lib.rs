//! # geocache
//!
//! A distributed, multi-tenant geospatial result cache: an index node
//! coordinates query planning and placement across worker nodes that each
//! hold cached tiles/feature collections and puzzle partial hits together.
//!
//! ## Architecture
//!
//! - `error`: crate-wide error taxonomy
//! - `config`: settings loaded from a key/value config file
//! - `telemetry`: `tracing` subscriber setup
//! - `stats`: cache/query statistics aggregation
//! - `geometry`: interval/cube algebra and query rectangles
//! - `payload`: cached value types (raster tiles, feature collections, plots)
//! - `cache`: per-node cache structures and the query planner
//! - `wire`: frame IO and wire message types
//! - `conn`: per-role connection state machines
//! - `index`: the index node (mirrored cache, scheduling, reorg, query manager)
//! - `node`: the worker node (local caches, delivery, puzzle executor)

pub mod error;
pub mod config;
pub mod telemetry;
pub mod stats;
pub mod geometry;
pub mod payload;
pub mod cache;
pub mod wire;
pub mod conn;
pub mod index;
pub mod node;

pub use error::{GeocacheError, GeocacheResult};
pub use config::Settings;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
