//! The worker node: local caches, delivery tracking, and the puzzle
//! executor that reassembles query results (spec.md §3.2-§3.3, §4.D, §4.I).

pub mod cache_manager;
pub mod delivery;
pub mod puzzle;
pub mod server;

pub use cache_manager::NodeCacheManager;
pub use delivery::{DeliveryId, DeliveryManager, DELIVERY_EXPIRY};
