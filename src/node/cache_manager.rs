//! `NodeCacheManager`: the five per-`CacheType` caches a worker node owns
//! (spec.md §3.3/§4.D), all storing the same `Payload` tagged union.

use crate::cache::{CacheCube, CacheType, NodeCache, ALL_CACHE_TYPES};
use crate::config::NodeConfig;
use crate::geometry::QueryRectangle;
use crate::payload::Payload;
use std::collections::HashMap;
use std::sync::Arc;

pub struct NodeCacheManager {
    caches: HashMap<CacheType, NodeCache<Payload>>,
}

impl NodeCacheManager {
    pub fn new(config: &NodeConfig) -> Self {
        let caches = ALL_CACHE_TYPES
            .iter()
            .map(|ct| (*ct, NodeCache::new(*ct, config.capacity_bytes_per_type)))
            .collect();
        Self { caches }
    }

    fn cache(&self, cache_type: CacheType) -> &NodeCache<Payload> {
        self.caches.get(&cache_type).expect("every CacheType has a cache")
    }

    pub fn put(&self, cache_type: CacheType, semantic_id: &str, bounds: CacheCube, payload: Payload) -> Option<u64> {
        let size = payload.size_bytes();
        self.cache(cache_type)
            .put(semantic_id, bounds, Arc::new(payload), size, crate::cache::entry::ProfilingData::default())
    }

    pub fn get(&self, cache_type: CacheType, semantic_id: &str, entry_id: u64) -> Option<Arc<Payload>> {
        self.cache(cache_type).get(semantic_id, entry_id).map(|e| e.data.clone())
    }

    pub fn query(&self, cache_type: CacheType, semantic_id: &str, qr: &QueryRectangle) -> crate::cache::CacheQueryResult {
        self.cache(cache_type).query(semantic_id, qr)
    }

    pub fn remove(&self, cache_type: CacheType, semantic_id: &str, entry_id: u64) -> bool {
        self.cache(cache_type).remove(semantic_id, entry_id).is_some()
    }

    pub fn used_bytes(&self, cache_type: CacheType) -> u64 {
        self.cache(cache_type).used_bytes()
    }

    pub fn capacity_summary(&self, config: &NodeConfig) -> HashMap<CacheType, u64> {
        ALL_CACHE_TYPES.iter().map(|ct| (*ct, config.capacity_bytes_per_type)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Cube3, QueryCube, TimeType};

    fn cube() -> CacheCube {
        CacheCube {
            query: QueryCube { cube: Cube3::from_bounds(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).unwrap(), epsg: 4326, time_type: TimeType::UnixSeconds },
            resolution_info: crate::cache::entry::ResolutionInfo::none(),
        }
    }

    #[test]
    fn put_and_get_round_trip_through_the_right_typed_cache() {
        let manager = NodeCacheManager::new(&NodeConfig::default());
        let tile = crate::payload::RasterTile::new(0.0, 0.0, 1.0, 1.0, 1, 1, -1.0);
        let id = manager.put(CacheType::Raster, "ndvi", cube(), Payload::Raster(tile)).unwrap();
        assert!(manager.get(CacheType::Raster, "ndvi", id).is_some());
        assert!(manager.get(CacheType::Points, "ndvi", id).is_none());
    }
}
