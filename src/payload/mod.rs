//! Cached payload types (design notes §9: a tagged union replaces the
//! original's deep per-type inheritance).
//!
//! A `Payload` is always stored behind an `Arc` once cached
//! (`cache::node_cache::NodeCacheEntry`); nothing mutates it after `put`.

pub mod feature;
pub mod raster;

pub use feature::FeatureCollection;
pub use raster::RasterTile;

use serde::{Deserialize, Serialize};

/// A plot result (a chart, table, or other non-spatial-collection output).
/// Puzzling is unsupported for plots (spec.md §4.I); requests that would
/// require puzzling a plot are rejected upstream by the query manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotBlob {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Raster(RasterTile),
    Points(FeatureCollection),
    Lines(FeatureCollection),
    Polygons(FeatureCollection),
    Plot(PlotBlob),
}

impl Payload {
    pub fn size_bytes(&self) -> u64 {
        match self {
            Payload::Raster(r) => r.size_bytes(),
            Payload::Points(f) | Payload::Lines(f) | Payload::Polygons(f) => f.size_bytes(),
            Payload::Plot(p) => p.bytes.len() as u64,
        }
    }

    pub fn is_plot(&self) -> bool {
        matches!(self, Payload::Plot(_))
    }
}
