//! Reorganization strategies (spec.md §4.G). Modeled as small sum types
//! over `ReorgStrategyKind` rather than a strategy trait object hierarchy,
//! per design notes §9 ("avoid vtables in the hot path").

use crate::cache::CacheType;
use crate::config::{ReorgStrategyKind, RelevanceKind};
use crate::index::cache::{IndexCache, NodeEntryKey};
use crate::index::relevance;
use crate::wire::{ReorgDescription, ReorgMoveItem, ReorgRemoveItem};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct NodeUsage {
    pub node_id: u32,
    pub used: u64,
    pub capacity: u64,
}

impl NodeUsage {
    pub fn ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used as f64 / self.capacity as f64
        }
    }
}

/// Per-node connection info needed to address a move's source (`ReorgMoveItem::from_host/from_port`).
#[derive(Debug, Clone)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

/// The capacity strategy triggers on usage imbalance; geo/graph are
/// treated the same way in the absence of a cheaper structural signal —
/// an Open Question in the source the spec leaves unresolved for those
/// two strategies (recorded in DESIGN.md).
pub fn requires_reorg(kind: ReorgStrategyKind, usages: &[NodeUsage]) -> bool {
    if usages.is_empty() {
        return false;
    }
    match kind {
        ReorgStrategyKind::Never => false,
        ReorgStrategyKind::Capacity | ReorgStrategyKind::Geo | ReorgStrategyKind::Graph => {
            let ratios: Vec<f64> = usages.iter().map(NodeUsage::ratio).collect();
            let max = ratios.iter().cloned().fold(f64::MIN, f64::max);
            let min = ratios.iter().cloned().fold(f64::MAX, f64::min);
            max - min > 0.15
        }
    }
}

struct PoolItem {
    key: NodeEntryKey,
    semantic_id: String,
    size_bytes: u64,
    score: f64,
}

pub fn reorganize(
    kind: ReorgStrategyKind,
    cache_type: CacheType,
    entries: &IndexCache,
    usages: &[NodeUsage],
    nodes: &HashMap<u32, NodeAddr>,
    relevance_kind: RelevanceKind,
) -> ReorgDescription {
    match kind {
        ReorgStrategyKind::Never => ReorgDescription { moves: Vec::new(), removals: Vec::new() },
        ReorgStrategyKind::Capacity => capacity_reorg(cache_type, entries, usages, nodes, relevance_kind),
        ReorgStrategyKind::Geo => geographic_reorg(cache_type, entries, usages, nodes),
        ReorgStrategyKind::Graph => graph_reorg(cache_type, entries, usages, nodes),
    }
}

fn capacity_reorg(
    cache_type: CacheType,
    entries: &IndexCache,
    usages: &[NodeUsage],
    nodes: &HashMap<u32, NodeAddr>,
    relevance_kind: RelevanceKind,
) -> ReorgDescription {
    if usages.is_empty() {
        return ReorgDescription { moves: Vec::new(), removals: Vec::new() };
    }
    let mean_ratio = usages.iter().map(NodeUsage::ratio).sum::<f64>() / usages.len() as f64;
    let target_ratio = mean_ratio.min(0.8);

    let mut pool: Vec<PoolItem> = Vec::new();
    let mut remaining_used: HashMap<u32, u64> = usages.iter().map(|u| (u.node_id, u.used)).collect();

    for usage in usages {
        let target_bytes = (usage.capacity as f64 * target_ratio) as u64;
        if usage.used <= target_bytes {
            continue;
        }
        let mut node_entries: Vec<PoolItem> = entries
            .entries_for_node(usage.node_id)
            .map(|e| PoolItem {
                key: NodeEntryKey { node_id: usage.node_id, entry_id: e.meta.key.entry_id },
                semantic_id: e.meta.semantic_id.clone(),
                size_bytes: e.meta.entry.size_bytes,
                score: relevance::score(relevance_kind, &e.meta.entry),
            })
            .collect();
        node_entries.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());

        let mut used = usage.used;
        for item in node_entries {
            if used <= target_bytes {
                break;
            }
            used -= item.size_bytes;
            pool.push(item);
        }
        remaining_used.insert(usage.node_id, used);
    }

    pool.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let mut moves = Vec::new();
    let mut underflow: Vec<&NodeUsage> = usages.iter().filter(|u| u.used <= (u.capacity as f64 * target_ratio) as u64).collect();
    underflow.sort_by_key(|u| u.node_id);

    for node in underflow {
        let target_bytes = (node.capacity as f64 * target_ratio) as u64;
        let mut used = *remaining_used.get(&node.node_id).unwrap_or(&node.used);
        while used < target_bytes {
            let Some(pos) = pool.iter().position(|item| used + item.size_bytes <= target_bytes) else {
                break;
            };
            let item = pool.remove(pos);
            let Some(addr) = nodes.get(&item.key.node_id) else { continue };
            used += item.size_bytes;
            moves.push(ReorgMoveItem {
                cache_type,
                semantic_id: item.semantic_id,
                entry_id: item.key.entry_id,
                from_node_id: item.key.node_id,
                from_host: addr.host.clone(),
                from_port: addr.port,
            });
        }
        remaining_used.insert(node.node_id, used);
    }

    let removals = pool
        .into_iter()
        .map(|item| ReorgRemoveItem { cache_type, semantic_id: item.semantic_id, entry_id: item.key.entry_id })
        .collect();

    ReorgDescription { moves, removals }
}

/// Simplified spherical-Mercator projection of a lat/lon-bearing cube's
/// centroid (x, y treated as lon/lat degrees). No `proj`-equivalent crate
/// exists across the reference pack; this closed form is adequate for a
/// nearest-node assignment, which only needs relative positions, not a
/// standards-conformant CRS transform (recorded as an Open Question
/// resolution in DESIGN.md).
pub fn web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    const R: f64 = 6_378_137.0;
    let x = lon.to_radians() * R;
    let lat_clamped = lat.clamp(-85.05112878, 85.05112878);
    let y = R * ((std::f64::consts::FRAC_PI_4 + lat_clamped.to_radians() / 2.0).tan()).ln();
    (x, y)
}

fn geographic_reorg(
    cache_type: CacheType,
    entries: &IndexCache,
    usages: &[NodeUsage],
    nodes: &HashMap<u32, NodeAddr>,
) -> ReorgDescription {
    // Centroid per node over its entries' (x, y) bounds, projected via `web_mercator`.
    let mut centroids: HashMap<u32, (f64, f64, usize)> = HashMap::new();
    for usage in usages {
        let mut sum = (0.0, 0.0);
        let mut count = 0usize;
        for e in entries.entries_for_node(usage.node_id) {
            let cube = e.meta.entry.bounds.cube();
            let lon = (cube.x.a + cube.x.b) / 2.0;
            let lat = (cube.y.a + cube.y.b) / 2.0;
            let (x, y) = web_mercator(lon, lat);
            sum.0 += x;
            sum.1 += y;
            count += 1;
        }
        if count > 0 {
            centroids.insert(usage.node_id, (sum.0 / count as f64, sum.1 / count as f64, count));
        }
    }

    let mut moves = Vec::new();
    for usage in usages {
        for e in entries.entries_for_node(usage.node_id) {
            let cube = e.meta.entry.bounds.cube();
            let (x, y) = web_mercator((cube.x.a + cube.x.b) / 2.0, (cube.y.a + cube.y.b) / 2.0);
            let nearest = centroids
                .iter()
                .min_by(|a, b| {
                    let da = (a.1 .0 - x).hypot(a.1 .1 - y);
                    let db = (b.1 .0 - x).hypot(b.1 .1 - y);
                    da.partial_cmp(&db).unwrap()
                })
                .map(|(id, _)| *id);
            if let Some(target) = nearest {
                if target != usage.node_id {
                    if let Some(addr) = nodes.get(&usage.node_id) {
                        moves.push(ReorgMoveItem {
                            cache_type,
                            semantic_id: e.meta.semantic_id.clone(),
                            entry_id: e.meta.key.entry_id,
                            from_node_id: usage.node_id,
                            from_host: addr.host.clone(),
                            from_port: addr.port,
                        });
                    }
                }
            }
        }
    }

    ReorgDescription { moves, removals: Vec::new() }
}

/// One semantic id is a "child" of another if its operator-graph string
/// contains the other's as a prefix, e.g. `"OP1 {SRC}"` is a child of
/// `"SRC"`.
fn is_child_prefix(child: &str, parent: &str) -> bool {
    child != parent && child.contains(parent)
}

fn graph_reorg(
    cache_type: CacheType,
    entries: &IndexCache,
    usages: &[NodeUsage],
    nodes: &HashMap<u32, NodeAddr>,
) -> ReorgDescription {
    // Group semantic ids into prefix-forest clusters; keep each cluster's
    // members together by relocating all of a cluster's non-majority-node
    // entries onto whichever node holds the most bytes of that cluster.
    let mut by_semantic: HashMap<String, Vec<(u32, u64, u64)>> = HashMap::new();
    for e in entries.iter() {
        by_semantic
            .entry(e.meta.semantic_id.clone())
            .or_default()
            .push((e.node_id, e.meta.key.entry_id, e.meta.entry.size_bytes));
    }

    let semantic_ids: Vec<String> = by_semantic.keys().cloned().collect();
    let mut cluster_of: HashMap<String, String> = HashMap::new();
    for id in &semantic_ids {
        let root = semantic_ids
            .iter()
            .filter(|candidate| is_child_prefix(id, candidate))
            .min_by_key(|candidate| candidate.len())
            .cloned()
            .unwrap_or_else(|| id.clone());
        cluster_of.insert(id.clone(), root);
    }

    let mut cluster_node_bytes: HashMap<String, HashMap<u32, u64>> = HashMap::new();
    for (id, locations) in &by_semantic {
        let cluster = cluster_of.get(id).cloned().unwrap_or_else(|| id.clone());
        let by_node = cluster_node_bytes.entry(cluster).or_default();
        for (node_id, _, size) in locations {
            *by_node.entry(*node_id).or_insert(0) += size;
        }
    }

    let target_ratio = if usages.is_empty() {
        0.8
    } else {
        (usages.iter().map(NodeUsage::ratio).sum::<f64>() / usages.len() as f64).min(0.8)
    };
    let capacity_of: HashMap<u32, u64> = usages.iter().map(|u| (u.node_id, u.capacity)).collect();

    let mut moves = Vec::new();
    for (id, locations) in &by_semantic {
        let cluster = cluster_of.get(id).cloned().unwrap_or_else(|| id.clone());
        let Some(majority_node) = cluster_node_bytes
            .get(&cluster)
            .and_then(|m| m.iter().max_by_key(|(_, bytes)| **bytes).map(|(n, _)| *n))
        else {
            continue;
        };
        let target_bytes = capacity_of.get(&majority_node).map(|c| (*c as f64 * target_ratio) as u64).unwrap_or(u64::MAX);
        let current = cluster_node_bytes.get(&cluster).and_then(|m| m.get(&majority_node)).copied().unwrap_or(0);
        if current > target_bytes {
            continue;
        }
        for (node_id, entry_id, _) in locations {
            if *node_id != majority_node {
                if let Some(addr) = nodes.get(node_id) {
                    moves.push(ReorgMoveItem {
                        cache_type,
                        semantic_id: id.clone(),
                        entry_id: *entry_id,
                        from_node_id: *node_id,
                        from_host: addr.host.clone(),
                        from_port: addr.port,
                    });
                }
            }
        }
    }

    ReorgDescription { moves, removals: Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_usages_do_not_require_reorg() {
        let usages = vec![
            NodeUsage { node_id: 1, used: 50, capacity: 100 },
            NodeUsage { node_id: 2, used: 55, capacity: 100 },
        ];
        assert!(!requires_reorg(ReorgStrategyKind::Capacity, &usages));
    }

    #[test]
    fn skewed_usages_require_reorg() {
        let usages = vec![
            NodeUsage { node_id: 1, used: 95, capacity: 100 },
            NodeUsage { node_id: 2, used: 10, capacity: 100 },
        ];
        assert!(requires_reorg(ReorgStrategyKind::Capacity, &usages));
    }

    #[test]
    fn never_strategy_never_requires_reorg() {
        let usages = vec![NodeUsage { node_id: 1, used: 99, capacity: 100 }];
        assert!(!requires_reorg(ReorgStrategyKind::Never, &usages));
    }
}
