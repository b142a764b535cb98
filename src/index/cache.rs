//! The index's mirrored view of every worker's cache (spec.md §3.3 IndexCache).

use crate::cache::entry::{CacheCube, IndexCacheEntry, MetaCacheEntry};
use crate::cache::structure::{plan_query, CacheQueryResult, EntryId};
use crate::geometry::QueryRectangle;
use std::collections::{HashMap, HashSet};

/// One entry's identity at the index: which node holds it, and its
/// node-local entry id (entry ids are opaque and only dense within a
/// single node's lifetime — spec.md §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeEntryKey {
    pub node_id: u32,
    pub entry_id: EntryId,
}

/// Mirrors all worker entries of one `CacheType`, with node ownership, so
/// the index can plan jobs (DeliverJob/PuzzleJob/miss) without round
/// tripping to nodes.
#[derive(Default)]
pub struct IndexCache {
    entries: HashMap<NodeEntryKey, IndexCacheEntry>,
    by_node: HashMap<u32, HashSet<NodeEntryKey>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: IndexCacheEntry) {
        let key = NodeEntryKey { node_id: entry.node_id, entry_id: entry.meta.key.entry_id };
        self.by_node.entry(entry.node_id).or_default().insert(key);
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, node_id: u32, entry_id: EntryId) -> Option<IndexCacheEntry> {
        let key = NodeEntryKey { node_id, entry_id };
        if let Some(set) = self.by_node.get_mut(&node_id) {
            set.remove(&key);
        }
        self.entries.remove(&key)
    }

    /// A node's control connection died: purge every entry it owned
    /// (spec.md §3.3: "if a node disconnects, all its entries are purged").
    pub fn purge_node(&mut self, node_id: u32) -> Vec<IndexCacheEntry> {
        let Some(keys) = self.by_node.remove(&node_id) else {
            return Vec::new();
        };
        keys.into_iter().filter_map(|k| self.entries.remove(&k)).collect()
    }

    pub fn get(&self, key: NodeEntryKey) -> Option<&IndexCacheEntry> {
        self.entries.get(&key)
    }

    pub fn entries_for_node(&self, node_id: u32) -> impl Iterator<Item = &IndexCacheEntry> {
        self.by_node
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(move |k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexCacheEntry> {
        self.entries.values()
    }

    /// Runs the same planner used node-side (`cache::structure::plan_query`)
    /// over this semantic id's mirrored entries, returning the result plus
    /// a side table mapping the result's synthetic keys back to
    /// `(node_id, node_local_entry_id)` pairs.
    pub fn plan(&self, semantic_id: &str, qr: &QueryRectangle) -> (CacheQueryResult, Vec<NodeEntryKey>) {
        let mut lookup: Vec<NodeEntryKey> = Vec::new();
        let candidates: Vec<(EntryId, CacheCube)> = self
            .entries
            .values()
            .filter(|e| e.meta.semantic_id == semantic_id)
            .map(|e| {
                let idx = lookup.len() as EntryId;
                lookup.push(NodeEntryKey { node_id: e.node_id, entry_id: e.meta.key.entry_id });
                (idx, e.meta.entry.bounds)
            })
            .collect();

        let result = plan_query(candidates.into_iter(), qr);
        (result, lookup)
    }

    /// Convenience for `insert` from a bare `MetaCacheEntry` announcement.
    pub fn insert_announced(&mut self, node_id: u32, meta: MetaCacheEntry) {
        self.insert(IndexCacheEntry { meta, node_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{hash_semantic_id, CacheEntry, ProfilingData, ResolutionInfo, TypedNodeCacheKey};
    use crate::cache::CacheType;
    use crate::geometry::{Cube3, QueryCube, TimeType};

    fn meta(entry_id: u64, semantic_id: &str) -> MetaCacheEntry {
        let bounds = CacheCube {
            query: QueryCube {
                cube: Cube3::from_bounds(0.0, 10.0, 0.0, 10.0, 0.0, 1.0).unwrap(),
                epsg: 4326,
                time_type: TimeType::UnixSeconds,
            },
            resolution_info: ResolutionInfo::none(),
        };
        MetaCacheEntry {
            key: TypedNodeCacheKey { cache_type: CacheType::Raster, semantic_id_hash: hash_semantic_id(semantic_id), entry_id },
            semantic_id: semantic_id.to_string(),
            entry: CacheEntry::new(bounds, 10, ProfilingData::default()),
        }
    }

    #[test]
    fn purge_node_removes_only_that_nodes_entries() {
        let mut cache = IndexCache::new();
        cache.insert_announced(1, meta(1, "src"));
        cache.insert_announced(2, meta(1, "src"));
        assert_eq!(cache.len(), 2);
        let purged = cache.purge_node(1);
        assert_eq!(purged.len(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.entries_for_node(1).next().is_none());
    }

    #[test]
    fn plan_maps_keys_back_to_node_entry_pairs() {
        let mut cache = IndexCache::new();
        cache.insert_announced(7, meta(3, "src"));
        let qr = QueryRectangle::none(4326, 0.0, 0.0, 10.0, 10.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();
        let (result, lookup) = cache.plan("src", &qr);
        assert!(result.is_full_hit());
        assert_eq!(lookup[result.keys[0] as usize], NodeEntryKey { node_id: 7, entry_id: 3 });
    }
}
