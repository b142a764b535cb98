//! Cache entries and their bounds (spec.md §3.2).

use crate::geometry::{Cube3, Epsg, QueryCube, QueryRectangle, ResolutionType, TimeType};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheType {
    Raster,
    Points,
    Lines,
    Polygons,
    Plot,
}

pub const ALL_CACHE_TYPES: [CacheType; 5] = [
    CacheType::Raster,
    CacheType::Points,
    CacheType::Lines,
    CacheType::Polygons,
    CacheType::Plot,
];

/// Admissible pixel-scale range for raster-like results; ignored (left at
/// defaults) for non-raster results, whose `resolution_type` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    pub resolution_type: ResolutionType,
    pub pixel_scale_x_range: (f64, f64),
    pub pixel_scale_y_range: (f64, f64),
    pub pixel_scale_x: f64,
    pub pixel_scale_y: f64,
}

impl ResolutionInfo {
    pub fn none() -> Self {
        Self {
            resolution_type: ResolutionType::None,
            pixel_scale_x_range: (0.0, 0.0),
            pixel_scale_y_range: (0.0, 0.0),
            pixel_scale_x: 0.0,
            pixel_scale_y: 0.0,
        }
    }

    pub fn pixels(pixel_scale_x: f64, pixel_scale_y: f64, tolerance: f64) -> Self {
        Self {
            resolution_type: ResolutionType::Pixels,
            pixel_scale_x_range: (
                pixel_scale_x * (1.0 - tolerance),
                pixel_scale_x * (1.0 + tolerance),
            ),
            pixel_scale_y_range: (
                pixel_scale_y * (1.0 - tolerance),
                pixel_scale_y * (1.0 + tolerance),
            ),
            pixel_scale_x,
            pixel_scale_y,
        }
    }

    /// Same resolution type as `query`, and (for PIXELS) the query's pixel
    /// scale falls inside this entry's admissible range on both axes.
    pub fn matches(&self, query: &QueryRectangle) -> bool {
        if self.resolution_type != query.resolution_type {
            return false;
        }
        if self.resolution_type == ResolutionType::None {
            return true;
        }
        let (xlo, xhi) = self.pixel_scale_x_range;
        let (ylo, yhi) = self.pixel_scale_y_range;
        let qx = query.pixel_scale_x();
        let qy = query.pixel_scale_y();
        xlo <= qx && qx <= xhi && ylo <= qy && qy <= yhi
    }
}

/// `QueryCube` plus resolution info — the spatial/temporal/resolution
/// region an entry is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheCube {
    pub query: QueryCube,
    pub resolution_info: ResolutionInfo,
}

impl CacheCube {
    pub fn cube(&self) -> Cube3 {
        self.query.cube
    }

    pub fn epsg(&self) -> Epsg {
        self.query.epsg
    }

    pub fn time_type(&self) -> TimeType {
        self.query.time_type
    }

    pub fn intersects(&self, other: &Cube3) -> bool {
        self.query.cube.intersects(other)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfilingData {
    pub cpu_ms: f64,
    pub gpu_ms: f64,
    pub io_ms: f64,
}

impl ProfilingData {
    pub fn add(&mut self, other: &ProfilingData) {
        self.cpu_ms += other.cpu_ms;
        self.gpu_ms += other.gpu_ms;
        self.io_ms += other.io_ms;
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub bounds: CacheCube,
    pub size_bytes: u64,
    pub profile: ProfilingData,
    pub last_access: u64,
    pub access_count: u32,
}

impl CacheEntry {
    pub fn new(bounds: CacheCube, size_bytes: u64, profile: ProfilingData) -> Self {
        Self {
            bounds,
            size_bytes,
            profile,
            last_access: now_ms(),
            access_count: 1,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = now_ms();
        self.access_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedNodeCacheKey {
    pub cache_type: CacheType,
    pub semantic_id_hash: u64,
    pub entry_id: u64,
}

/// The unit exchanged between nodes and the index: a key plus its entry
/// metadata. `semantic_id` travels alongside the hash used in
/// `TypedNodeCacheKey` so the index can group entries without having to
/// reverse a hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCacheEntry {
    pub key: TypedNodeCacheKey,
    pub semantic_id: String,
    pub entry: CacheEntry,
}

/// The index's view of a `MetaCacheEntry`: additionally tagged with the
/// owning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCacheEntry {
    pub meta: MetaCacheEntry,
    pub node_id: u32,
}

pub fn hash_semantic_id(semantic_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    semantic_id.hash(&mut hasher);
    hasher.finish()
}
