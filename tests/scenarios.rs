//! End-to-end scenario tests exercising several modules together the way
//! a live cache/puzzle/reorg cycle would, without standing up real
//! sockets (the unit tests alongside each module already cover wire
//! framing and per-role state machines in isolation).

use geocache::cache::entry::{CacheCube, ProfilingData, ResolutionInfo};
use geocache::cache::CacheType;
use geocache::config::{NodeConfig, RelevanceKind, ReorgStrategyKind, SchedulerKind};
use geocache::geometry::{Cube3, Interval, QueryCube, QueryRectangle, TimeType};
use geocache::index::placement::{NodeCandidate, SchedulerState};
use geocache::index::query_manager::{AddRequestOutcome, QueryManager};
use geocache::index::reorg::{self, NodeAddr, NodeUsage};
use geocache::index::IndexCache;
use geocache::node::cache_manager::NodeCacheManager;
use geocache::node::puzzle::{self, RemainderSource};
use geocache::payload::{FeatureCollection, Payload, RasterTile};
use geocache::wire::messages::{BaseRequest, CacheRef, PuzzleRequest};
use std::collections::HashMap;

fn flat_bounds() -> CacheCube {
    CacheCube {
        query: QueryCube { cube: Cube3::from_bounds(0.0, 10.0, 0.0, 10.0, 0.0, 1.0).unwrap(), epsg: 4326, time_type: TimeType::UnixSeconds },
        resolution_info: ResolutionInfo::none(),
    }
}

struct ZeroSource;
impl RemainderSource for ZeroSource {
    fn compute_raster(&self, cube: &Cube3, psx: f64, psy: f64) -> Result<RasterTile, geocache::GeocacheError> {
        let w = ((cube.x.b - cube.x.a) / psx).round().max(1.0) as usize;
        let h = ((cube.y.b - cube.y.a) / psy).round().max(1.0) as usize;
        Ok(RasterTile::new(cube.x.a, cube.y.a, psx, psy, w, h, f64::NAN))
    }
    fn compute_features(&self, _cube: &Cube3) -> Result<FeatureCollection, geocache::GeocacheError> {
        Ok(FeatureCollection::empty())
    }
}

// Scenario: a node-local query misses the cache, gets served as a whole
// remainder, and the result is cached so a second identical query hits.
#[tokio::test]
async fn miss_then_hit_round_trips_through_the_node_cache() {
    let config = NodeConfig::default();
    let caches = NodeCacheManager::new(&config);

    let query = QueryRectangle::pixels(4326, 0.0, 0.0, 4.0, 4.0, TimeType::UnixSeconds, 0.0, 1.0, 4, 4).unwrap();
    let miss = caches.query(CacheType::Raster, "ndvi", &query);
    assert!(!miss.is_full_hit());

    let req = BaseRequest { cache_type: CacheType::Raster, semantic_id: "ndvi".to_string(), query: query.clone() };
    let puzzle_req = PuzzleRequest { base: req.clone(), parts: Vec::new(), remainder: vec![query.cube()] };
    let payload = puzzle::execute(&puzzle_req, &caches, &ZeroSource, "node-a", 9000).await.unwrap();

    let bounds = CacheCube { query: query.query_cube(), resolution_info: ResolutionInfo::none() };
    let entry_id = caches.put(CacheType::Raster, "ndvi", bounds, payload).unwrap();
    assert!(caches.get(CacheType::Raster, "ndvi", entry_id).is_some());

    let hit = caches.query(CacheType::Raster, "ndvi", &query);
    assert!(hit.is_full_hit());
}

// Scenario: two locally-cached tiles cover part of a query, a remainder
// fills the rest, and the puzzle executor blits everything together.
#[tokio::test]
async fn puzzle_executes_across_two_local_entries_with_a_remainder() {
    let config = NodeConfig::default();
    let caches = NodeCacheManager::new(&config);

    let left = RasterTile::new(0.0, 0.0, 1.0, 1.0, 2, 4, 1.0);
    let right = RasterTile::new(2.0, 0.0, 1.0, 1.0, 2, 4, 2.0);
    let left_id = caches.put(CacheType::Raster, "ndvi", flat_bounds(), Payload::Raster(left)).unwrap();
    let right_id = caches.put(CacheType::Raster, "ndvi", flat_bounds(), Payload::Raster(right)).unwrap();

    let covered = QueryRectangle::pixels(4326, 0.0, 0.0, 4.0, 4.0, TimeType::UnixSeconds, 0.0, 1.0, 4, 4).unwrap();
    let req = BaseRequest { cache_type: CacheType::Raster, semantic_id: "ndvi".to_string(), query: covered.clone() };
    let remainder = Cube3::new(Interval::new_unchecked(0.0, 4.0), Interval::new_unchecked(0.0, 4.0), Interval::new_unchecked(0.0, 1.0));
    let parts = vec![
        CacheRef { host: "node-a".to_string(), port: 9000, entry_id: left_id, bounds: flat_bounds() },
        CacheRef { host: "node-a".to_string(), port: 9000, entry_id: right_id, bounds: flat_bounds() },
    ];
    let puzzle_req = PuzzleRequest { base: req, parts, remainder: vec![remainder] };

    let payload = puzzle::execute(&puzzle_req, &caches, &ZeroSource, "node-a", 9000).await.unwrap();
    match payload {
        Payload::Raster(tile) => {
            assert_eq!(tile.get(0, 0), 1.0);
            assert_eq!(tile.get(2, 0), 2.0);
        }
        _ => panic!("expected a raster payload"),
    }
}

// Scenario: capacity reorg evicts the coldest entries off an overflowing
// node until every node sits at or under the shared target ratio.
#[test]
fn capacity_reorg_relieves_an_overflowing_node() {
    use geocache::cache::entry::{hash_semantic_id, CacheEntry, IndexCacheEntry, MetaCacheEntry, TypedNodeCacheKey};

    let mut cache = IndexCache::new();
    for entry_id in 0..10 {
        let meta = MetaCacheEntry {
            key: TypedNodeCacheKey { cache_type: CacheType::Raster, semantic_id_hash: hash_semantic_id("ndvi"), entry_id },
            semantic_id: "ndvi".to_string(),
            entry: CacheEntry::new(flat_bounds(), 100, ProfilingData::default()),
        };
        cache.insert(IndexCacheEntry { meta, node_id: 1 });
    }

    let usages = vec![NodeUsage { node_id: 1, used: 1_000, capacity: 1_000 }, NodeUsage { node_id: 2, used: 0, capacity: 1_000 }];
    assert!(reorg::requires_reorg(ReorgStrategyKind::Capacity, &usages));

    let mut nodes = HashMap::new();
    nodes.insert(1, NodeAddr { host: "node-a".to_string(), port: 9000 });
    nodes.insert(2, NodeAddr { host: "node-b".to_string(), port: 9000 });

    let description = reorg::reorganize(ReorgStrategyKind::Capacity, CacheType::Raster, &cache, &usages, &nodes, RelevanceKind::Lru);
    assert!(!description.moves.is_empty() || !description.removals.is_empty());
    for mv in &description.moves {
        assert_eq!(mv.from_node_id, 1);
    }
}

// Scenario: a second request fully contained in a still-pending job
// attaches to it instead of creating a new one, and the job is cancelled
// only once every attached client has aborted.
#[test]
fn overlapping_requests_batch_and_client_abort_cancels_once_empty() {
    let mut qm = QueryManager::new();
    let wide = QueryRectangle::none(4326, 0.0, 0.0, 10.0, 10.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();
    let narrow = QueryRectangle::none(4326, 2.0, 2.0, 4.0, 4.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();

    let first = match qm.add_request(CacheType::Raster, "ndvi", wide, Vec::new(), Vec::new()) {
        AddRequestOutcome::Created(id) => id,
        other => panic!("expected a new job, got {other:?}"),
    };
    let second = match qm.add_request(CacheType::Raster, "ndvi", narrow, Vec::new(), Vec::new()) {
        AddRequestOutcome::Attached(id) => id,
        other => panic!("expected the narrower request to attach, got {other:?}"),
    };
    assert_eq!(first, second);
    assert_eq!(qm.pending_len(), 1);

    qm.client_abort(first);
    assert_eq!(qm.pending_len(), 1, "one of two waiting clients left, job should still be pending");
    qm.client_abort(first);
    assert_eq!(qm.pending_len(), 0, "last client aborted, job should be gone");
}

// Scenario: with two candidate nodes of differing load, the default
// scheduler places a pending job on the less busy one.
#[test]
fn scheduler_places_pending_jobs_on_the_least_busy_node() {
    let mut qm = QueryManager::new();
    let query = QueryRectangle::none(4326, 0.0, 0.0, 1.0, 1.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap();
    qm.add_request(CacheType::Raster, "ndvi", query, Vec::new(), Vec::new());

    let scheduler = SchedulerState::new();
    let candidates = vec![
        NodeCandidate { node_id: 1, queue_len: 0, busy_workers: 4, idle_workers: 0 },
        NodeCandidate { node_id: 2, queue_len: 0, busy_workers: 1, idle_workers: 3 },
    ];
    let dispatched = qm.schedule_pending_jobs(&scheduler, SchedulerKind::Default, &candidates, |_| 0, |_| None);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].1, 2);
    assert_eq!(qm.pending_len(), 0);
    assert_eq!(qm.running_len(), 1);
}
