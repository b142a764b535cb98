//! Wire message bodies (spec.md §3.4). Each is bincode-serialized as the
//! payload of a frame; the command/response code travels as a separate
//! leading byte (see `wire::framing`), not as part of the bincode encoding.

use crate::cache::{CacheCube, CacheType, MetaCacheEntry};
use crate::geometry::{Cube3, QueryRectangle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type NodeId = u32;
pub type WorkerId = u32;
pub type EntryId = u64;
pub type DeliveryId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseRequest {
    pub cache_type: CacheType,
    pub semantic_id: String,
    pub query: QueryRectangle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRequest {
    pub base: BaseRequest,
    pub entry_id: EntryId,
    /// How many independent pickups this delivery should serve before the
    /// node frees it (spec.md §4.J) — one per client batched onto the job.
    pub count: u32,
}

/// A pointer to one cached entry on a specific node, as handed to a worker
/// assembling a puzzle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRef {
    pub host: String,
    pub port: u16,
    pub entry_id: EntryId,
    pub bounds: CacheCube,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PuzzleRequest {
    pub base: BaseRequest,
    pub parts: Vec<CacheRef>,
    pub remainder: Vec<Cube3>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResponse {
    pub host: String,
    pub port: u16,
    pub delivery_id: DeliveryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorgMoveItem {
    pub cache_type: CacheType,
    pub semantic_id: String,
    pub entry_id: EntryId,
    pub from_node_id: NodeId,
    pub from_host: String,
    pub from_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorgRemoveItem {
    pub cache_type: CacheType,
    pub semantic_id: String,
    pub entry_id: EntryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorgDescription {
    pub moves: Vec<ReorgMoveItem>,
    pub removals: Vec<ReorgRemoveItem>,
}

/// Streamed back by a node, one per move, as the control connection
/// executes a `ReorgDescription`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorgMoveResult {
    pub item: ReorgMoveItem,
    pub new_entry_id: EntryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeHandshake {
    pub port: u16,
    pub capacity_per_type: HashMap<CacheType, u64>,
    pub entries: Vec<MetaCacheEntry>,
}
