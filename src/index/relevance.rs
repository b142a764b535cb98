//! Entry relevance scoring for reorg/eviction decisions (spec.md §4.G).

use crate::cache::CacheEntry;
use crate::config::RelevanceKind;

const TEN_SECOND_QUANTUM_MS: f64 = 10_000.0;

/// Higher score means more worth keeping. `costlru` favors recently and
/// frequently accessed entries; `lru` favors recency alone.
pub fn score(kind: RelevanceKind, entry: &CacheEntry) -> f64 {
    match kind {
        RelevanceKind::Lru => entry.last_access as f64,
        RelevanceKind::CostLru => {
            let recency = entry.last_access as f64 / TEN_SECOND_QUANTUM_MS;
            let frequency_bonus = (entry.access_count as f64 / 1000.0).min(1.0);
            recency * (1.0 + frequency_bonus)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{CacheCube, ProfilingData, ResolutionInfo};
    use crate::geometry::{Cube3, QueryCube, TimeType};

    fn entry(last_access: u64, access_count: u32) -> CacheEntry {
        CacheEntry {
            bounds: CacheCube {
                query: QueryCube {
                    cube: Cube3::from_bounds(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).unwrap(),
                    epsg: 4326,
                    time_type: TimeType::UnixSeconds,
                },
                resolution_info: ResolutionInfo::none(),
            },
            size_bytes: 1,
            profile: ProfilingData::default(),
            last_access,
            access_count,
        }
    }

    #[test]
    fn lru_ignores_access_count() {
        let a = entry(1000, 1);
        let b = entry(1000, 500);
        assert_eq!(score(RelevanceKind::Lru, &a), score(RelevanceKind::Lru, &b));
    }

    #[test]
    fn costlru_rewards_frequent_access() {
        let a = entry(10_000, 1);
        let b = entry(10_000, 1000);
        assert!(score(RelevanceKind::CostLru, &b) > score(RelevanceKind::CostLru, &a));
    }
}
