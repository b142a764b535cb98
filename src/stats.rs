//! Statistics types exchanged between node and index (spec.md §3.4, §4.G/H).
//!
//! `CacheStats` is a delta drained from a `NodeCache`'s access tracker
//! (§4.D); `QueryStats` aggregates scheduling/wait latencies the query
//! manager records per job (§4.H); `NodeStats` is what a node reports to
//! the index on a stats-request control round-trip; `SystemStats` is what
//! the index hands back to a client on `CMD_GET_STATS`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cache::entry::CacheType;

/// Per-(node, type) access counters since the last stats report, drained
/// from a `NodeCache`'s access tracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub single_local_hits: u64,
    pub multi_local_hits: u64,
    pub single_remote_hits: u64,
    pub multi_remote_hits: u64,
    pub misses: u64,
    pub lost_puts: u64,
    pub entry_count: u64,
    pub used_bytes: u64,
}

impl CacheStats {
    pub fn merge(&mut self, other: &CacheStats) {
        self.single_local_hits += other.single_local_hits;
        self.multi_local_hits += other.multi_local_hits;
        self.single_remote_hits += other.single_remote_hits;
        self.multi_remote_hits += other.multi_remote_hits;
        self.misses += other.misses;
        self.lost_puts += other.lost_puts;
        self.entry_count = other.entry_count;
        self.used_bytes = other.used_bytes;
    }
}

/// A simple running-average latency accumulator; avoids pulling in a
/// histogram crate for what is, per spec.md §4.H, just wait/scheduling
/// latency reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    pub fn record(&mut self, ms: f64) {
        self.count += 1;
        self.total_ms += ms;
        if ms > self.max_ms {
            self.max_ms = ms;
        }
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        self.count += other.count;
        self.total_ms += other.total_ms;
        self.max_ms = self.max_ms.max(other.max_ms);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryStats {
    pub wait_latency: LatencyStats,
    pub scheduling_latency: LatencyStats,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// Reported by a node to the index on a control stats round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: u32,
    pub capacity_per_type: HashMap<CacheType, u64>,
    pub cache_stats: HashMap<CacheType, CacheStats>,
    pub query_stats: QueryStats,
}

/// Returned to a client on `CMD_GET_STATS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub per_node: HashMap<u32, NodeStats>,
    pub query_stats: QueryStats,
}

impl SystemStats {
    pub fn reset(&mut self) {
        self.per_node.clear();
        self.query_stats = QueryStats::default();
    }
}
