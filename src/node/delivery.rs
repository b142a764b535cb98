//! Tracks results awaiting client/peer pickup over the delivery role
//! (spec.md §4.F.4). Entries expire after 30 seconds if nobody collects
//! them, freeing the backing cache entry's delivery slot.

use crate::payload::Payload;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DELIVERY_EXPIRY: Duration = Duration::from_secs(30);

pub type DeliveryId = u64;

struct Ready {
    payload: Arc<Payload>,
    remaining: u32,
    created_at: Instant,
}

#[derive(Default)]
pub struct DeliveryManager {
    next_id: DeliveryId,
    ready: HashMap<DeliveryId, Ready>,
}

impl DeliveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a delivery good for `count` independent pickups (spec.md
    /// §4.J) — one per client batched onto the job that produced it.
    pub fn add(&mut self, payload: Arc<Payload>, count: u32) -> DeliveryId {
        let id = self.next_id;
        self.next_id += 1;
        self.ready.insert(id, Ready { payload, remaining: count.max(1), created_at: Instant::now() });
        id
    }

    /// Retrieves a ready delivery, decrementing its remaining count; the
    /// entry is only dropped once every attached client has picked up
    /// (spec.md §4.J).
    pub fn get(&mut self, id: DeliveryId) -> Option<Arc<Payload>> {
        let ready = self.ready.get_mut(&id)?;
        let payload = ready.payload.clone();
        ready.remaining -= 1;
        if ready.remaining == 0 {
            self.ready.remove(&id);
        }
        Some(payload)
    }

    /// Drops everything that has sat unclaimed past `DELIVERY_EXPIRY`,
    /// returning how many were swept.
    pub fn sweep_expired(&mut self) -> usize {
        let before = self.ready.len();
        let now = Instant::now();
        self.ready.retain(|_, r| now.duration_since(r.created_at) < DELIVERY_EXPIRY);
        before - self.ready.len()
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PlotBlob;

    fn plot() -> Arc<Payload> {
        Arc::new(Payload::Plot(PlotBlob { mime_type: "text/plain".to_string(), bytes: vec![1, 2, 3] }))
    }

    #[test]
    fn add_then_get_consumes_the_entry() {
        let mut mgr = DeliveryManager::new();
        let id = mgr.add(plot(), 1);
        assert!(mgr.get(id).is_some());
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn count_based_fan_out_serves_each_attached_client_once() {
        let mut mgr = DeliveryManager::new();
        let id = mgr.add(plot(), 3);
        assert!(mgr.get(id).is_some());
        assert!(mgr.get(id).is_some());
        assert_eq!(mgr.len(), 1, "still outstanding after two of three pickups");
        assert!(mgr.get(id).is_some());
        assert!(mgr.get(id).is_none(), "removed once every attached client picked up");
    }

    #[test]
    fn sweep_expired_is_a_no_op_for_fresh_entries() {
        let mut mgr = DeliveryManager::new();
        mgr.add(plot(), 1);
        assert_eq!(mgr.sweep_expired(), 0);
        assert_eq!(mgr.len(), 1);
    }
}
