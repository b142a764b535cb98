//! Per-semantic-id cache structure and query planner (spec.md §4.C).
//!
//! `CacheStructure<T>` owns the entries for one (type, semantic-id) pair on
//! one cache owner (a node, or the index's mirrored view). The planner
//! (`plan_query`) is kept as a free function over entry bounds so it can be
//! unit-tested without constructing real payloads, and is shared by both
//! the node-side `query` and the index's own opportunistic re-query during
//! `Processing` (spec.md §4.H).

use crate::cache::entry::{CacheCube, CacheEntry, ProfilingData};
use crate::geometry::{Cube3, Interval, QueryRectangle};
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub type EntryId = u64;

/// A cached value plus its metadata, as held inside a `CacheStructure`.
/// Access counters are atomics because they're the only thing mutated
/// after insertion (spec.md §3.3); everything else is immutable once put.
pub struct NodeCacheEntry<T> {
    pub bounds: CacheCube,
    pub data: Arc<T>,
    pub size_bytes: u64,
    pub profile: ProfilingData,
    last_access_ms: AtomicU64,
    access_count: AtomicU32,
}

impl<T> NodeCacheEntry<T> {
    pub fn new(bounds: CacheCube, data: Arc<T>, size_bytes: u64, profile: ProfilingData) -> Self {
        Self {
            bounds,
            data,
            size_bytes,
            profile,
            last_access_ms: AtomicU64::new(crate::cache::entry::now_ms()),
            access_count: AtomicU32::new(1),
        }
    }

    pub fn touch(&self) {
        self.last_access_ms
            .store(crate::cache::entry::now_ms(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn as_cache_entry(&self) -> CacheEntry {
        CacheEntry {
            bounds: self.bounds,
            size_bytes: self.size_bytes,
            profile: self.profile,
            last_access: self.last_access(),
            access_count: self.access_count(),
        }
    }
}

/// Result of planning a query against a `CacheStructure`: either a hit
/// (possibly partial), a puzzle plan, or a miss (`keys` empty, `remainder
/// == [query_cube]`).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheQueryResult {
    pub covered: QueryRectangle,
    pub keys: Vec<EntryId>,
    pub remainder: Vec<Cube3>,
}

impl CacheQueryResult {
    pub fn is_full_hit(&self) -> bool {
        !self.keys.is_empty() && self.remainder.is_empty()
    }

    pub fn is_miss(&self) -> bool {
        self.keys.is_empty()
    }
}

fn miss(query: QueryRectangle) -> CacheQueryResult {
    CacheQueryResult {
        covered: query,
        keys: Vec::new(),
        remainder: vec![query.cube()],
    }
}

/// A scored candidate, ordered solely by score so it can sit in a
/// `BinaryHeap` without requiring `Ord` on `CacheCube` itself.
struct Candidate {
    score: OrderedFloat<f64>,
    id: EntryId,
    bounds: CacheCube,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.cmp(&other.score)
    }
}

/// Plans a query against a set of candidate `(entry_id, bounds)` pairs,
/// implementing spec.md §4.C steps 1-6.
pub fn plan_query(
    candidates: impl Iterator<Item = (EntryId, CacheCube)>,
    query: &QueryRectangle,
) -> CacheQueryResult {
    let query_cube = query.cube();
    let query_volume = query_cube.volume();

    // Step 1: collect and score candidates.
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
    for (id, bounds) in candidates {
        if bounds.epsg() != query.epsg || bounds.time_type() != query.time_type {
            continue;
        }
        if !bounds.resolution_info.matches(query) {
            continue;
        }
        if !bounds.intersects(&query_cube) {
            continue;
        }
        if query.is_pixels() && !bounds.cube().t.contains(&query_cube.t) {
            continue;
        }
        let score = bounds.cube().intersection_volume(&query_cube) / query_volume;
        let exact = (1.0 - score).abs() <= 1e-9;
        heap.push(Candidate { score: OrderedFloat(score), id, bounds });
        if exact {
            // Short-circuit candidate *collection* only: we already have a
            // perfect-score candidate, no need to keep scanning for more.
            // We still run the full cover/dissect/enlarge pipeline below
            // rather than returning early, so resolution coherence is
            // still enforced against any other exact ties already queued.
            break;
        }
    }

    if heap.is_empty() {
        return miss(*query);
    }

    // Step 2: greedily cover the query.
    let mut remainders = vec![query_cube];
    let mut used: Vec<(EntryId, CacheCube)> = Vec::new();
    let mut used_pixel_scale: Option<(f64, f64)> = None;

    while let Some(Candidate { id, bounds, .. }) = heap.pop() {
        if remainders.is_empty() {
            break;
        }
        if query.is_pixels() {
            let ps = (bounds.resolution_info.pixel_scale_x, bounds.resolution_info.pixel_scale_y);
            match used_pixel_scale {
                Some((ux, uy)) => {
                    let close = |a: f64, b: f64| (a - b).abs() <= 0.01 * a.abs().max(b.abs()).max(1e-12);
                    if !close(ps.0, ux) || !close(ps.1, uy) {
                        continue;
                    }
                }
                None => used_pixel_scale = Some(ps),
            }
        }

        let mut touched = false;
        let mut next_remainders = Vec::with_capacity(remainders.len());
        for r in &remainders {
            if r.intersects(&bounds.cube()) {
                touched = true;
                next_remainders.extend(r.dissect_by(&bounds.cube()));
            } else {
                next_remainders.push(*r);
            }
        }
        if touched {
            remainders = next_remainders;
            used.push((id, bounds));
        }
    }

    // Step 3: union near-adjacent remainder slabs.
    remainders = union_remainders(remainders);

    // Step 4: enlarge the covered envelope.
    let covered = enlarge_envelope(query, &remainders, &used);

    // Step 5: low-coverage guard.
    let remainder_volume: f64 = remainders.iter().map(|r| r.volume()).sum();
    if remainder_volume > 0.9 * query_volume {
        return miss(*query);
    }

    if used.is_empty() {
        // Defensive: candidates existed but none survived the cover step.
        return miss(*query);
    }

    // Step 6: PIXELS-specific snap of the envelope's time span and resolution.
    let covered = if query.is_pixels() {
        snap_pixels_envelope(covered, query, &used)
    } else {
        covered
    };

    CacheQueryResult {
        covered,
        keys: used.into_iter().map(|(id, _)| id).collect(),
        remainder: remainders,
    }
}

fn union_remainders(mut remainders: Vec<Cube3>) -> Vec<Cube3> {
    loop {
        let mut merged = false;
        'outer: for i in 0..remainders.len() {
            for j in (i + 1)..remainders.len() {
                if let Some(combined) = remainders[i].try_union_near_equal_volume(&remainders[j]) {
                    remainders[i] = combined;
                    remainders.remove(j);
                    merged = true;
                    break 'outer;
                }
            }
        }
        if !merged {
            break;
        }
    }
    remainders
}

fn enlarge_envelope(
    query: &QueryRectangle,
    remainders: &[Cube3],
    used: &[(EntryId, CacheCube)],
) -> QueryRectangle {
    let qc = query.cube();
    let mut lo = (f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut hi = (f64::INFINITY, f64::INFINITY, f64::INFINITY);

    for r in remainders {
        if r.x.a <= qc.x.a {
            lo.0 = qc.x.a;
        }
        if r.x.b >= qc.x.b {
            hi.0 = qc.x.b;
        }
        if r.y.a <= qc.y.a {
            lo.1 = qc.y.a;
        }
        if r.y.b >= qc.y.b {
            hi.1 = qc.y.b;
        }
        if r.t.a <= qc.t.a {
            lo.2 = qc.t.a;
        }
        if r.t.b >= qc.t.b {
            hi.2 = qc.t.b;
        }
    }

    for (_, bounds) in used {
        let b = bounds.cube();
        if b.x.a <= qc.x.a && lo.0 == f64::NEG_INFINITY {
            lo.0 = b.x.a;
        }
        if b.x.b >= qc.x.b && hi.0 == f64::INFINITY {
            hi.0 = b.x.b;
        }
        if b.y.a <= qc.y.a && lo.1 == f64::NEG_INFINITY {
            lo.1 = b.y.a;
        }
        if b.y.b >= qc.y.b && hi.1 == f64::INFINITY {
            hi.1 = b.y.b;
        }
        if b.t.a <= qc.t.a && lo.2 == f64::NEG_INFINITY {
            lo.2 = b.t.a;
        }
        if b.t.b >= qc.t.b && hi.2 == f64::INFINITY {
            hi.2 = b.t.b;
        }
    }

    if lo.0 == f64::NEG_INFINITY {
        lo.0 = qc.x.a;
    }
    if hi.0 == f64::INFINITY {
        hi.0 = qc.x.b;
    }
    if lo.1 == f64::NEG_INFINITY {
        lo.1 = qc.y.a;
    }
    if hi.1 == f64::INFINITY {
        hi.1 = qc.y.b;
    }
    if lo.2 == f64::NEG_INFINITY {
        lo.2 = qc.t.a;
    }
    if hi.2 == f64::INFINITY {
        hi.2 = qc.t.b;
    }

    let mut covered = *query;
    covered.x1 = lo.0;
    covered.x2 = hi.0;
    covered.y1 = lo.1;
    covered.y2 = hi.1;
    covered.t1 = lo.2;
    covered.t2 = hi.2;
    covered
}

fn snap_pixels_envelope(
    mut covered: QueryRectangle,
    query: &QueryRectangle,
    used: &[(EntryId, CacheCube)],
) -> QueryRectangle {
    if used.is_empty() {
        return covered;
    }
    let mut common: Option<Interval> = None;
    for (_, bounds) in used {
        let t = bounds.cube().t;
        common = Some(match common {
            Some(c) => c.intersect(&t).unwrap_or(c),
            None => t,
        });
    }
    if let Some(common) = common {
        covered.t1 = common.a;
        covered.t2 = common.b;
    }

    // Pixel scale is held constant; resolution grows with the enlarged
    // extent relative to the original query.
    let query_x_extent = query.x2 - query.x1;
    let query_y_extent = query.y2 - query.y1;
    let covered_x_extent = covered.x2 - covered.x1;
    let covered_y_extent = covered.y2 - covered.y1;
    if query_x_extent > 0.0 {
        covered.xres = (query.xres as f64 * covered_x_extent / query_x_extent).ceil() as u32;
    }
    if query_y_extent > 0.0 {
        covered.yres = (query.yres as f64 * covered_y_extent / query_y_extent).ceil() as u32;
    }
    covered
}

/// Per-semantic-id, per-type-and-owner cache container.
pub struct CacheStructure<T> {
    entries: Mutex<HashMap<EntryId, Arc<NodeCacheEntry<T>>>>,
    current_size: AtomicU64,
}

impl<T> Default for CacheStructure<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            current_size: AtomicU64::new(0),
        }
    }
}

impl<T> CacheStructure<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, id: EntryId, entry: Arc<NodeCacheEntry<T>>) {
        let size = entry.size_bytes;
        self.entries.lock().insert(id, entry);
        self.current_size.fetch_add(size, Ordering::Relaxed);
    }

    pub fn remove(&self, id: EntryId) -> Option<Arc<NodeCacheEntry<T>>> {
        let removed = self.entries.lock().remove(&id);
        if let Some(entry) = &removed {
            self.current_size.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        removed
    }

    pub fn get(&self, id: EntryId) -> Option<Arc<NodeCacheEntry<T>>> {
        let entry = self.entries.lock().get(&id).cloned();
        if let Some(entry) = &entry {
            entry.touch();
        }
        entry
    }

    pub fn peek(&self, id: EntryId) -> Option<Arc<NodeCacheEntry<T>>> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn iter_bounds(&self) -> Vec<(EntryId, CacheCube)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, e)| (*id, e.bounds))
            .collect()
    }

    pub fn query(&self, qr: &QueryRectangle) -> CacheQueryResult {
        plan_query(self.iter_bounds().into_iter(), qr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ResolutionInfo;
    use crate::geometry::{QueryCube, TimeType};

    fn cache_cube(x1: f64, x2: f64, y1: f64, y2: f64, t1: f64, t2: f64) -> CacheCube {
        CacheCube {
            query: QueryCube {
                cube: Cube3::from_bounds(x1, x2, y1, y2, t1, t2).unwrap(),
                epsg: 4326,
                time_type: TimeType::UnixSeconds,
            },
            resolution_info: ResolutionInfo::none(),
        }
    }

    fn none_query(x1: f64, x2: f64, y1: f64, y2: f64, t1: f64, t2: f64) -> QueryRectangle {
        QueryRectangle::none(4326, x1, y1, x2, y2, TimeType::UnixSeconds, t1, t2).unwrap()
    }

    #[test]
    fn empty_structure_misses() {
        let result = plan_query(std::iter::empty(), &none_query(0.0, 10.0, 0.0, 10.0, 0.0, 1.0));
        assert!(result.is_miss());
        assert_eq!(result.remainder, vec![none_query(0.0, 10.0, 0.0, 10.0, 0.0, 1.0).cube()]);
    }

    #[test]
    fn exact_match_is_full_hit() {
        let bounds = cache_cube(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let query = none_query(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let result = plan_query(std::iter::once((1u64, bounds)), &query);
        assert!(result.is_full_hit());
        assert_eq!(result.keys, vec![1]);
    }

    #[test]
    fn partial_overlap_produces_remainder_covering_the_gap() {
        let bounds = cache_cube(0.0, 5.0, 0.0, 10.0, 0.0, 1.0);
        let query = none_query(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let result = plan_query(std::iter::once((1u64, bounds)), &query);
        assert_eq!(result.keys, vec![1]);
        assert!(!result.remainder.is_empty());
        let total_remainder: f64 = result.remainder.iter().map(|c| c.volume()).sum();
        assert!((total_remainder - query.cube().intersection_volume(&Cube3::from_bounds(5.0, 10.0, 0.0, 10.0, 0.0, 1.0).unwrap())).abs() < 1e-6);
    }

    #[test]
    fn very_low_coverage_is_reported_as_a_miss() {
        let bounds = cache_cube(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        let query = none_query(0.0, 100.0, 0.0, 100.0, 0.0, 1.0);
        let result = plan_query(std::iter::once((1u64, bounds)), &query);
        assert!(result.is_miss());
    }

    #[test]
    fn non_overlapping_epsg_is_not_a_candidate() {
        let mut bounds = cache_cube(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        bounds.query.epsg = 3857;
        let query = none_query(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let result = plan_query(std::iter::once((1u64, bounds)), &query);
        assert!(result.is_miss());
    }

    #[test]
    fn cache_structure_put_get_remove_accounting() {
        let structure: CacheStructure<Vec<u8>> = CacheStructure::new();
        let bounds = cache_cube(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
        let e1 = Arc::new(NodeCacheEntry::new(bounds, Arc::new(vec![0u8; 10]), 10, ProfilingData::default()));
        let e2 = Arc::new(NodeCacheEntry::new(bounds, Arc::new(vec![0u8; 20]), 20, ProfilingData::default()));
        structure.insert(1, e1);
        structure.insert(2, e2);
        assert_eq!(structure.current_size(), 30);
        structure.remove(1);
        assert_eq!(structure.current_size(), 20);
    }
}
