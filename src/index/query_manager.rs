//! Tracks in-flight query jobs across their lifetime (spec.md §4.H):
//! `pending_jobs` (not yet dispatched to a node), `running_queries`
//! (dispatched, awaiting a worker result), `finished_queries` (result
//! ready for delivery pickup).

use crate::cache::CacheType;
use crate::config::SchedulerKind;
use crate::geometry::{Cube3, QueryRectangle};
use crate::index::placement::{NodeCandidate, SchedulerState};
use crate::wire::messages::CacheRef;
use std::collections::HashMap;

pub type JobId = u64;

/// Extending an existing job's query to also cover a new request is only
/// allowed while the merged volume stays within these bounds (spec.md
/// §4.H) — beyond that it's cheaper to run a second, separate job.
const EXTEND_VOLUME_GROWTH_TOLERANCE: f64 = 0.01;
const EXTEND_VOLUME_CAP_MULTIPLIER: f64 = 4.04;
const PIXEL_SCALE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub cache_type: CacheType,
    pub semantic_id: String,
    pub query: QueryRectangle,
    pub original_volume: f64,
    pub waiting_clients: u32,
    /// Already-cached parts this job's plan covers it with (spec.md
    /// §4.H). Empty means a plain miss dispatched as `CMD_CREATE`.
    pub parts: Vec<CacheRef>,
    /// Uncovered sub-cubes the worker still has to compute to complete
    /// the plan. Non-empty only for a genuine partial hit.
    pub remainder: Vec<Cube3>,
}

impl Job {
    /// Whether this job's plan needs the puzzle executor (`CMD_PUZZLE`) —
    /// more than one cached part, or any uncovered remainder — as opposed
    /// to a plain `CMD_CREATE` (a miss, or a single full-hit part where the
    /// target node's own cache lookup is the fast path).
    pub fn is_puzzle(&self) -> bool {
        self.parts.len() > 1 || !self.remainder.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunningQuery {
    pub job: Job,
    pub node_id: u32,
}

#[derive(Debug, Clone)]
pub struct FinishedQuery {
    pub job: Job,
    pub node_id: u32,
    pub entry_id: u64,
}

#[derive(Default)]
pub struct QueryManager {
    next_job_id: JobId,
    pending_jobs: Vec<Job>,
    running_queries: HashMap<JobId, RunningQuery>,
    finished_queries: HashMap<JobId, FinishedQuery>,
}

/// Outcome of `add_request`: either it attached to (or extended) existing
/// work, or it needed a brand-new job.
#[derive(Debug)]
pub enum AddRequestOutcome {
    Attached(JobId),
    Extended(JobId),
    Created(JobId),
}

impl QueryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn contains(outer: &QueryRectangle, inner: &QueryRectangle) -> bool {
        outer.epsg == inner.epsg
            && outer.time_type == inner.time_type
            && outer.x1 <= inner.x1
            && outer.y1 <= inner.y1
            && outer.t1 <= inner.t1
            && outer.x2 >= inner.x2
            && outer.y2 >= inner.y2
            && outer.t2 >= inner.t2
    }

    fn same_job_target(job: &Job, cache_type: CacheType, semantic_id: &str) -> bool {
        job.cache_type == cache_type && job.semantic_id == semantic_id
    }

    fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.pending_jobs.iter_mut().chain(self.running_queries.values_mut().map(|r| &mut r.job))
    }

    /// Attaches to an existing job whose query already covers the new
    /// request, extends one that can absorb it within the growth/size
    /// caps, or creates a brand-new job. `parts`/`remainder` describe the
    /// cache plan behind `query` and are only used when a new job is
    /// created — an attach/extend piggybacks on the plan the existing job
    /// was already built from.
    pub fn add_request(
        &mut self,
        cache_type: CacheType,
        semantic_id: &str,
        query: QueryRectangle,
        parts: Vec<CacheRef>,
        remainder: Vec<Cube3>,
    ) -> AddRequestOutcome {
        for job in self.jobs_mut() {
            if !Self::same_job_target(job, cache_type, semantic_id) {
                continue;
            }
            if Self::contains(&job.query, &query) && job.query.pixel_scale_matches(&query, PIXEL_SCALE_TOLERANCE) {
                job.waiting_clients += 1;
                return AddRequestOutcome::Attached(job.id);
            }
        }

        let new_volume = query.cube().volume();
        for job in self.jobs_mut() {
            if !Self::same_job_target(job, cache_type, semantic_id) {
                continue;
            }
            if !job.query.pixel_scale_matches(&query, PIXEL_SCALE_TOLERANCE) {
                continue;
            }
            let combined_cube = job.query.cube().combine(&query.cube());
            let combined_volume = combined_cube.volume();
            let growth = (combined_volume - job.original_volume.max(new_volume)) / job.original_volume.max(new_volume).max(1e-12);
            if growth <= EXTEND_VOLUME_GROWTH_TOLERANCE && combined_volume <= job.original_volume * EXTEND_VOLUME_CAP_MULTIPLIER {
                job.query.x1 = combined_cube.x.a;
                job.query.x2 = combined_cube.x.b;
                job.query.y1 = combined_cube.y.a;
                job.query.y2 = combined_cube.y.b;
                job.query.t1 = combined_cube.t.a;
                job.query.t2 = combined_cube.t.b;
                job.waiting_clients += 1;
                return AddRequestOutcome::Extended(job.id);
            }
        }

        let id = self.next_job_id;
        self.next_job_id += 1;
        self.pending_jobs.push(Job {
            id,
            cache_type,
            semantic_id: semantic_id.to_string(),
            query,
            original_volume: new_volume,
            waiting_clients: 1,
            parts,
            remainder,
        });
        AddRequestOutcome::Created(id)
    }

    /// Moves as many pending jobs as possible to `running_queries`, using
    /// `scheduler` to pick a node among `candidates`. A job whose plan
    /// already names cached parts prefers the node the first part lives
    /// on (spec.md §4.H: "a puzzle's priority-ordered node list" — here
    /// simplified to the first part) over the general scheduler, as long
    /// as that node is among `candidates`. Returns the (job, node_id)
    /// pairs that need to actually be dispatched over the wire.
    pub fn schedule_pending_jobs(
        &mut self,
        scheduler: &SchedulerState,
        kind: SchedulerKind,
        candidates: &[NodeCandidate],
        hilbert_index_of: impl Fn(&QueryRectangle) -> u64,
        preferred_node_of: impl Fn(&Job) -> Option<u32>,
    ) -> Vec<(Job, u32)> {
        let mut dispatched = Vec::new();
        let mut remaining = Vec::new();
        for job in self.pending_jobs.drain(..) {
            let chosen = preferred_node_of(&job)
                .filter(|id| candidates.iter().any(|c| c.node_id == *id))
                .or_else(|| {
                    let hidx = hilbert_index_of(&job.query);
                    scheduler.get_node_for_job(kind, candidates, hidx)
                });
            match chosen {
                Some(node_id) => {
                    dispatched.push((job.clone(), node_id));
                    self.running_queries.insert(job.id, RunningQuery { job, node_id });
                }
                None => remaining.push(job),
            }
        }
        self.pending_jobs = remaining;
        dispatched
    }

    /// A worker finished running the job's query (`RESP_RESULT_READY`).
    pub fn mark_finished(&mut self, job_id: JobId, entry_id: u64) -> Option<&FinishedQuery> {
        let running = self.running_queries.remove(&job_id)?;
        self.finished_queries.insert(job_id, FinishedQuery { job: running.job, node_id: running.node_id, entry_id });
        self.finished_queries.get(&job_id)
    }

    pub fn take_finished(&mut self, job_id: JobId) -> Option<FinishedQuery> {
        self.finished_queries.remove(&job_id)
    }

    /// A client aborted: decrement the waiting-client count, cancelling
    /// the job outright if it drops to zero (spec.md §4.H failure table).
    pub fn client_abort(&mut self, job_id: JobId) {
        if let Some(job) = self.pending_jobs.iter_mut().find(|j| j.id == job_id) {
            job.waiting_clients = job.waiting_clients.saturating_sub(1);
            if job.waiting_clients == 0 {
                self.pending_jobs.retain(|j| j.id != job_id);
            }
            return;
        }
        if let Some(running) = self.running_queries.get_mut(&job_id) {
            running.job.waiting_clients = running.job.waiting_clients.saturating_sub(1);
            if running.job.waiting_clients == 0 {
                self.running_queries.remove(&job_id);
            }
            return;
        }
        if let Some(finished) = self.finished_queries.get_mut(&job_id) {
            finished.job.waiting_clients = finished.job.waiting_clients.saturating_sub(1);
            if finished.job.waiting_clients == 0 {
                self.finished_queries.remove(&job_id);
            }
        }
    }

    /// The worker socket running this job died mid-flight: rebuild it as
    /// a fresh pending job so it gets rescheduled (spec.md §4.H failure
    /// table: "worker socket death → rebuild and re-enqueue").
    pub fn worker_socket_died(&mut self, job_id: JobId) {
        if let Some(running) = self.running_queries.remove(&job_id) {
            self.pending_jobs.push(running.job);
        }
    }

    /// A node disconnected entirely: every running job it held is purged
    /// back to pending for rescheduling elsewhere.
    pub fn node_failed(&mut self, node_id: u32) {
        let affected: Vec<JobId> = self
            .running_queries
            .iter()
            .filter(|(_, r)| r.node_id == node_id)
            .map(|(id, _)| *id)
            .collect();
        for id in affected {
            self.worker_socket_died(id);
        }
        self.finished_queries.retain(|_, f| f.node_id != node_id);
    }

    pub fn pending_len(&self) -> usize {
        self.pending_jobs.len()
    }

    pub fn running_len(&self) -> usize {
        self.running_queries.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished_queries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TimeType;

    fn qr(x1: f64, x2: f64) -> QueryRectangle {
        QueryRectangle::none(4326, x1, 0.0, x2, 10.0, TimeType::UnixSeconds, 0.0, 1.0).unwrap()
    }

    #[test]
    fn a_request_contained_in_a_pending_job_attaches() {
        let mut qm = QueryManager::new();
        let id = match qm.add_request(CacheType::Raster, "src", qr(0.0, 10.0), Vec::new(), Vec::new()) {
            AddRequestOutcome::Created(id) => id,
            _ => panic!("expected Created"),
        };
        match qm.add_request(CacheType::Raster, "src", qr(1.0, 2.0), Vec::new(), Vec::new()) {
            AddRequestOutcome::Attached(attached) => assert_eq!(attached, id),
            _ => panic!("expected Attached"),
        }
        assert_eq!(qm.pending_len(), 1);
    }

    #[test]
    fn a_disjoint_request_creates_a_new_job() {
        let mut qm = QueryManager::new();
        qm.add_request(CacheType::Raster, "src", qr(0.0, 1.0), Vec::new(), Vec::new());
        qm.add_request(CacheType::Raster, "src", qr(1000.0, 1001.0), Vec::new(), Vec::new());
        assert_eq!(qm.pending_len(), 2);
    }

    #[test]
    fn client_abort_cancels_job_when_last_client_leaves() {
        let mut qm = QueryManager::new();
        let id = match qm.add_request(CacheType::Raster, "src", qr(0.0, 1.0), Vec::new(), Vec::new()) {
            AddRequestOutcome::Created(id) => id,
            _ => panic!(),
        };
        qm.client_abort(id);
        assert_eq!(qm.pending_len(), 0);
    }

    #[test]
    fn node_failure_requeues_its_running_jobs() {
        let mut qm = QueryManager::new();
        let id = match qm.add_request(CacheType::Raster, "src", qr(0.0, 1.0), Vec::new(), Vec::new()) {
            AddRequestOutcome::Created(id) => id,
            _ => panic!(),
        };
        let job = qm.pending_jobs.remove(0);
        qm.running_queries.insert(id, RunningQuery { job, node_id: 5 });
        qm.node_failed(5);
        assert_eq!(qm.running_len(), 0);
        assert_eq!(qm.pending_len(), 1);
    }

    #[test]
    fn a_job_with_more_than_one_part_requires_the_puzzle_executor() {
        let mut qm = QueryManager::new();
        let part = CacheRef { host: "node-a".to_string(), port: 9000, entry_id: 1, bounds: crate::cache::entry::CacheCube {
            query: crate::geometry::QueryCube { cube: Cube3::from_bounds(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).unwrap(), epsg: 4326, time_type: crate::geometry::TimeType::UnixSeconds },
            resolution_info: crate::cache::entry::ResolutionInfo::none(),
        } };
        let id = match qm.add_request(CacheType::Raster, "src", qr(0.0, 1.0), vec![part.clone(), part], Vec::new()) {
            AddRequestOutcome::Created(id) => id,
            _ => panic!(),
        };
        let job = qm.jobs_mut().find(|j| j.id == id).unwrap();
        assert!(job.is_puzzle());
    }
}
