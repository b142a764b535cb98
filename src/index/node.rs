//! The index's bookkeeping record for one connected worker node (spec.md §3.2/§4.E).

use crate::cache::CacheType;
use crate::wire::messages::ReorgDescription;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeQueryStats {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// One worker node as tracked by the index: its address, per-`CacheType`
/// capacity, and how many workers are currently idle vs. busy processing
/// a job.
pub struct Node {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
    pub capacity_per_type: HashMap<CacheType, u64>,
    pub used_per_type: HashMap<CacheType, u64>,
    pub query_stats: NodeQueryStats,
    pub idle_workers: u32,
    pub busy_workers: u32,
    /// Outbound side of the node's control connection, draining into
    /// `CMD_REORG` frames; `None` until the connection's writer half is
    /// spun up in `index::server::handle_control_connection`.
    pub control_tx: Option<UnboundedSender<ReorgDescription>>,
}

impl Node {
    pub fn new(node_id: u32, host: String, port: u16, capacity_per_type: HashMap<CacheType, u64>, worker_count: u32) -> Self {
        Self {
            node_id,
            host,
            port,
            capacity_per_type,
            used_per_type: HashMap::new(),
            query_stats: NodeQueryStats::default(),
            idle_workers: worker_count,
            busy_workers: 0,
            control_tx: None,
        }
    }

    pub fn capacity_for(&self, cache_type: CacheType) -> u64 {
        self.capacity_per_type.get(&cache_type).copied().unwrap_or(0)
    }

    pub fn used_for(&self, cache_type: CacheType) -> u64 {
        self.used_per_type.get(&cache_type).copied().unwrap_or(0)
    }

    pub fn usage_ratio(&self, cache_type: CacheType) -> f64 {
        let capacity = self.capacity_for(cache_type);
        if capacity == 0 {
            0.0
        } else {
            self.used_for(cache_type) as f64 / capacity as f64
        }
    }

    /// A worker starts processing a job: moves one worker from idle to busy.
    pub fn claim_worker(&mut self) -> bool {
        if self.idle_workers == 0 {
            return false;
        }
        self.idle_workers -= 1;
        self.busy_workers += 1;
        true
    }

    /// A worker finishes (or fails) a job and returns to the idle pool.
    pub fn release_worker(&mut self) {
        if self.busy_workers > 0 {
            self.busy_workers -= 1;
        }
        self.idle_workers += 1;
    }

    pub fn has_idle_worker(&self) -> bool {
        self.idle_workers > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release_worker_moves_between_pools() {
        let mut node = Node::new(1, "localhost".into(), 9000, HashMap::new(), 2);
        assert!(node.claim_worker());
        assert_eq!((node.idle_workers, node.busy_workers), (1, 1));
        node.release_worker();
        assert_eq!((node.idle_workers, node.busy_workers), (2, 0));
    }

    #[test]
    fn claim_worker_fails_when_none_idle() {
        let mut node = Node::new(1, "localhost".into(), 9000, HashMap::new(), 0);
        assert!(!node.claim_worker());
    }

    #[test]
    fn usage_ratio_is_zero_for_unknown_cache_type() {
        let node = Node::new(1, "localhost".into(), 9000, HashMap::new(), 1);
        assert_eq!(node.usage_ratio(CacheType::Raster), 0.0);
    }
}
