//! `NodeCache`: the per-(node, type) container of `CacheStructure`s, keyed
//! by semantic id (spec.md §3.3/§4.D).

use crate::cache::entry::{CacheCube, CacheType};
use crate::cache::structure::{CacheQueryResult, CacheStructure, EntryId, NodeCacheEntry};
use crate::geometry::QueryRectangle;
use crate::stats::CacheStats;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Holds every `CacheStructure` for one cache type on one node. Reads
/// against an existing semantic id only take the map's read lock; creating
/// a structure for a never-seen semantic id takes the write lock once.
pub struct NodeCache<T> {
    cache_type: CacheType,
    capacity_bytes: u64,
    structures: RwLock<HashMap<String, Arc<CacheStructure<T>>>>,
    next_entry_id: AtomicU64,
    stats: Mutex<CacheStats>,
}

impl<T> NodeCache<T> {
    pub fn new(cache_type: CacheType, capacity_bytes: u64) -> Self {
        Self {
            cache_type,
            capacity_bytes,
            structures: RwLock::new(HashMap::new()),
            next_entry_id: AtomicU64::new(1),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    fn structure_for(&self, semantic_id: &str) -> Arc<CacheStructure<T>> {
        if let Some(s) = self.structures.read().get(semantic_id) {
            return s.clone();
        }
        let mut w = self.structures.write();
        w.entry(semantic_id.to_string())
            .or_insert_with(|| Arc::new(CacheStructure::new()))
            .clone()
    }

    pub fn used_bytes(&self) -> u64 {
        self.structures
            .read()
            .values()
            .map(|s| s.current_size())
            .sum()
    }

    pub fn entry_count(&self) -> u64 {
        self.structures.read().values().map(|s| s.len() as u64).sum()
    }

    /// Inserts a new entry for `semantic_id`. Returns `None` (and records a
    /// `lost_put`) if it would push the node over its per-type capacity —
    /// the node never evicts on its own; reorg (spec.md §4.E) handles that.
    pub fn put(
        &self,
        semantic_id: &str,
        bounds: CacheCube,
        data: Arc<T>,
        size_bytes: u64,
        profile: crate::cache::entry::ProfilingData,
    ) -> Option<EntryId> {
        let attempted = self.used_bytes() + size_bytes;
        let limit = (self.capacity_bytes as f64 * 1.1) as u64;
        if attempted > limit {
            tracing::warn!(
                error = %crate::error::CapacityExceeded { attempted, limit },
                cache_type = ?self.cache_type,
                semantic_id,
                "put rejected, counted as lost"
            );
            self.stats.lock().lost_puts += 1;
            return None;
        }
        let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let structure = self.structure_for(semantic_id);
        structure.insert(id, Arc::new(NodeCacheEntry::new(bounds, data, size_bytes, profile)));
        let mut stats = self.stats.lock();
        stats.entry_count = self.entry_count();
        stats.used_bytes = self.used_bytes();
        Some(id)
    }

    pub fn get(&self, semantic_id: &str, entry_id: EntryId) -> Option<Arc<NodeCacheEntry<T>>> {
        self.structures.read().get(semantic_id)?.get(entry_id)
    }

    pub fn remove(&self, semantic_id: &str, entry_id: EntryId) -> Option<Arc<NodeCacheEntry<T>>> {
        let removed = self.structures.read().get(semantic_id)?.remove(entry_id);
        if removed.is_some() {
            let mut stats = self.stats.lock();
            stats.entry_count = self.entry_count();
            stats.used_bytes = self.used_bytes();
        }
        removed
    }

    pub fn query(&self, semantic_id: &str, qr: &QueryRectangle) -> CacheQueryResult {
        let result = match self.structures.read().get(semantic_id) {
            Some(structure) => structure.query(qr),
            None => CacheQueryResult {
                covered: *qr,
                keys: Vec::new(),
                remainder: vec![qr.cube()],
            },
        };
        self.record(&result);
        result
    }

    fn record(&self, result: &CacheQueryResult) {
        let mut stats = self.stats.lock();
        match result.keys.len() {
            0 => stats.misses += 1,
            1 => stats.single_local_hits += 1,
            _ => stats.multi_local_hits += 1,
        }
    }

    /// Drains the accumulated stats delta, leaving the running
    /// entry_count/used_bytes gauges intact for the next report.
    pub fn drain_stats(&self) -> CacheStats {
        let mut stats = self.stats.lock();
        let snapshot = stats.clone();
        let entry_count = stats.entry_count;
        let used_bytes = stats.used_bytes;
        *stats = CacheStats::default();
        stats.entry_count = entry_count;
        stats.used_bytes = used_bytes;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{ProfilingData, ResolutionInfo};
    use crate::geometry::{Cube3, QueryCube, TimeType};

    fn bounds(x1: f64, x2: f64, y1: f64, y2: f64, t1: f64, t2: f64) -> CacheCube {
        CacheCube {
            query: QueryCube {
                cube: Cube3::from_bounds(x1, x2, y1, y2, t1, t2).unwrap(),
                epsg: 4326,
                time_type: TimeType::UnixSeconds,
            },
            resolution_info: ResolutionInfo::none(),
        }
    }

    #[test]
    fn put_get_query_roundtrip() {
        let cache: NodeCache<Vec<u8>> = NodeCache::new(CacheType::Raster, 1_000_000);
        let id = cache
            .put("ndvi", bounds(0.0, 10.0, 0.0, 10.0, 0.0, 1.0), Arc::new(vec![1, 2, 3]), 3, ProfilingData::default())
            .unwrap();
        assert!(cache.get("ndvi", id).is_some());

        let qr = QueryRectangle::none(4326, 0.0, 0.0, 10.0, 10.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();
        let result = cache.query("ndvi", &qr);
        assert!(result.is_full_hit());

        let stats = cache.drain_stats();
        assert_eq!(stats.single_local_hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn put_over_capacity_is_lost() {
        let cache: NodeCache<Vec<u8>> = NodeCache::new(CacheType::Raster, 5);
        let result = cache.put(
            "ndvi",
            bounds(0.0, 10.0, 0.0, 10.0, 0.0, 1.0),
            Arc::new(vec![0u8; 10]),
            10,
            ProfilingData::default(),
        );
        assert!(result.is_none());
        assert_eq!(cache.drain_stats().lost_puts, 1);
    }

    #[test]
    fn query_on_unknown_semantic_id_is_a_miss() {
        let cache: NodeCache<Vec<u8>> = NodeCache::new(CacheType::Raster, 1_000_000);
        let qr = QueryRectangle::none(4326, 0.0, 0.0, 10.0, 10.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();
        let result = cache.query("unknown", &qr);
        assert!(result.is_miss());
        assert_eq!(cache.drain_stats().misses, 1);
    }
}
