//! Job→node placement schedulers (spec.md §4.H). Each maintains a small
//! per-node latency estimator; `get_node_for_job` picks the node with the
//! lowest predicted completion latency among nodes that can serve the job.

use crate::config::SchedulerKind;
use std::collections::HashMap;

/// A node eligible to receive a job, with the load signals the schedulers
/// read from.
#[derive(Debug, Clone, Copy)]
pub struct NodeCandidate {
    pub node_id: u32,
    pub queue_len: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Dema {
    s1: f64,
    s2: f64,
    initialized: bool,
}

impl Dema {
    const ALPHA: f64 = 0.3;

    fn update(&mut self, sample: f64) {
        if !self.initialized {
            self.s1 = sample;
            self.s2 = sample;
            self.initialized = true;
            return;
        }
        self.s1 = Self::ALPHA * sample + (1.0 - Self::ALPHA) * self.s1;
        self.s2 = Self::ALPHA * self.s1 + (1.0 - Self::ALPHA) * self.s2;
    }

    /// Double EMA forecast: `2*s1 - s2`, which reacts faster to a trend
    /// than a single EMA.
    fn forecast(&self) -> f64 {
        if !self.initialized {
            0.0
        } else {
            2.0 * self.s1 - self.s2
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bema {
    ema: f64,
    bias: f64,
    initialized: bool,
}

impl Bema {
    const ALPHA: f64 = 0.3;
    const BETA: f64 = 0.1;

    fn update(&mut self, sample: f64) {
        if !self.initialized {
            self.ema = sample;
            self.bias = 0.0;
            self.initialized = true;
            return;
        }
        let prev_ema = self.ema;
        self.ema = Self::ALPHA * sample + (1.0 - Self::ALPHA) * self.ema;
        self.bias = Self::BETA * (self.ema - prev_ema) + (1.0 - Self::BETA) * self.bias;
    }

    /// Bias-corrected EMA forecast: the smoothed level plus its smoothed
    /// trend term.
    fn forecast(&self) -> f64 {
        if !self.initialized {
            0.0
        } else {
            self.ema + self.bias
        }
    }
}

/// Kernel-density estimate over recent latency samples, keyed by a
/// Hilbert-curve index of the job's spatial centroid so that nodes which
/// have recently served *nearby* queries are favored (spatial locality
/// improves cache-hit odds on the node the job ultimately lands on).
#[derive(Debug, Clone, Default)]
struct EmkdeHilbert {
    samples: Vec<(u64, f64)>,
}

impl EmkdeHilbert {
    const BANDWIDTH: f64 = 256.0;
    const MAX_SAMPLES: usize = 64;

    fn update(&mut self, hilbert_index: u64, latency_ms: f64) {
        self.samples.push((hilbert_index, latency_ms));
        if self.samples.len() > Self::MAX_SAMPLES {
            self.samples.remove(0);
        }
    }

    fn forecast(&self, hilbert_index: u64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut weight_sum = 0.0;
        let mut value_sum = 0.0;
        for (idx, latency) in &self.samples {
            let d = (*idx as f64 - hilbert_index as f64) / Self::BANDWIDTH;
            let w = (-0.5 * d * d).exp();
            weight_sum += w;
            value_sum += w * latency;
        }
        if weight_sum == 0.0 {
            self.samples.iter().map(|(_, l)| l).sum::<f64>() / self.samples.len() as f64
        } else {
            value_sum / weight_sum
        }
    }
}

/// Hilbert-curve index of a 2D point on a `order`-bit grid, used purely as
/// a locality key (not a precise spatial index) to bucket nearby queries.
pub fn hilbert_index(mut x: u32, mut y: u32, order: u32) -> u64 {
    let mut d: u64 = 0;
    let mut s = 1u32 << (order - 1);
    while s > 0 {
        let rx = if (x & s) > 0 { 1 } else { 0 };
        let ry = if (y & s) > 0 { 1 } else { 0 };
        d += (s as u64) * (s as u64) * ((3 * rx) ^ ry) as u64;
        // rotate
        if ry == 0 {
            if rx == 1 {
                x = s.wrapping_sub(1).wrapping_sub(x);
                y = s.wrapping_sub(1).wrapping_sub(y);
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

#[derive(Default)]
pub struct SchedulerState {
    dema: HashMap<u32, Dema>,
    bema: HashMap<u32, Bema>,
    emkde: HashMap<u32, EmkdeHilbert>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_latency(&mut self, kind: SchedulerKind, node_id: u32, hilbert_index: u64, latency_ms: f64) {
        match kind {
            SchedulerKind::Dema => self.dema.entry(node_id).or_default().update(latency_ms),
            SchedulerKind::Bema => self.bema.entry(node_id).or_default().update(latency_ms),
            SchedulerKind::Emkde => self.emkde.entry(node_id).or_default().update(hilbert_index, latency_ms),
            SchedulerKind::Default | SchedulerKind::Late => {}
        }
    }

    fn predicted_latency(&self, kind: SchedulerKind, node_id: u32, hilbert_index: u64) -> f64 {
        match kind {
            SchedulerKind::Dema => self.dema.get(&node_id).map(Dema::forecast).unwrap_or(0.0),
            SchedulerKind::Bema => self.bema.get(&node_id).map(Bema::forecast).unwrap_or(0.0),
            SchedulerKind::Emkde => self.emkde.get(&node_id).map(|e| e.forecast(hilbert_index)).unwrap_or(0.0),
            SchedulerKind::Default | SchedulerKind::Late => 0.0,
        }
    }

    /// Picks the candidate with the lowest cost for `kind`. `Default`
    /// breaks ties on fewest busy workers (simple least-loaded); `Late`
    /// prefers the shortest pending queue, deferring the node choice as
    /// late as possible. `Dema`/`Bema`/`Emkde` minimize predicted latency,
    /// falling back to queue length on a tie.
    pub fn get_node_for_job(
        &self,
        kind: SchedulerKind,
        candidates: &[NodeCandidate],
        hilbert_index: u64,
    ) -> Option<u32> {
        let eligible: Vec<&NodeCandidate> = candidates.iter().filter(|c| c.idle_workers > 0).collect();
        let pool = if eligible.is_empty() { candidates.iter().collect::<Vec<_>>() } else { eligible };
        if pool.is_empty() {
            return None;
        }
        match kind {
            SchedulerKind::Default => pool.iter().min_by_key(|c| c.busy_workers).map(|c| c.node_id),
            SchedulerKind::Late => pool.iter().min_by_key(|c| c.queue_len).map(|c| c.node_id),
            SchedulerKind::Dema | SchedulerKind::Bema | SchedulerKind::Emkde => pool
                .iter()
                .min_by(|a, b| {
                    let la = self.predicted_latency(kind, a.node_id, hilbert_index);
                    let lb = self.predicted_latency(kind, b.node_id, hilbert_index);
                    la.partial_cmp(&lb).unwrap().then_with(|| a.queue_len.cmp(&b.queue_len))
                })
                .map(|c| c.node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scheduler_prefers_least_busy_node() {
        let sched = SchedulerState::new();
        let candidates = vec![
            NodeCandidate { node_id: 1, queue_len: 0, busy_workers: 4, idle_workers: 1 },
            NodeCandidate { node_id: 2, queue_len: 0, busy_workers: 1, idle_workers: 1 },
        ];
        assert_eq!(sched.get_node_for_job(SchedulerKind::Default, &candidates, 0), Some(2));
    }

    #[test]
    fn dema_prefers_node_with_lower_recorded_latency() {
        let mut sched = SchedulerState::new();
        sched.record_latency(SchedulerKind::Dema, 1, 0, 500.0);
        sched.record_latency(SchedulerKind::Dema, 2, 0, 50.0);
        let candidates = vec![
            NodeCandidate { node_id: 1, queue_len: 0, busy_workers: 0, idle_workers: 1 },
            NodeCandidate { node_id: 2, queue_len: 0, busy_workers: 0, idle_workers: 1 },
        ];
        assert_eq!(sched.get_node_for_job(SchedulerKind::Dema, &candidates, 0), Some(2));
    }

    #[test]
    fn hilbert_index_is_stable_for_identical_points() {
        assert_eq!(hilbert_index(10, 20, 8), hilbert_index(10, 20, 8));
    }

    #[test]
    fn no_eligible_node_returns_none() {
        let sched = SchedulerState::new();
        assert_eq!(sched.get_node_for_job(SchedulerKind::Default, &[], 0), None);
    }
}
