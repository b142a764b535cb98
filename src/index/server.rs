//! The index node's event loop (spec.md §5.1, §4.E-H): a single actor task
//! owns all mutable coordinator state and is driven by an `mpsc` command
//! channel, mirroring the teacher's single-owner-task-plus-channel pattern
//! in `enterprise::cluster::transport::Transport` (there: one task per
//! accepted connection forwarding into an unbounded channel the owner
//! drains; here: every role's accept loop forwards into the same channel
//! the actor drains).

use crate::cache::CacheType;
use crate::config::Settings;
use crate::error::GeocacheError;
use crate::geometry::QueryRectangle;
use crate::index::node::Node;
use crate::index::placement::{hilbert_index, NodeCandidate, SchedulerState};
use crate::index::query_manager::{AddRequestOutcome, QueryManager};
use crate::index::reorg::{self, NodeAddr, NodeUsage};
use crate::index::IndexCache;
use crate::wire::codes::client as client_codes;
use crate::wire::codes::control as control_codes;
use crate::wire::codes::worker as worker_codes;
use crate::wire::framing::{read_frame, write_message};
use crate::wire::messages::{BaseRequest, CacheRef, DeliveryRequest, DeliveryResponse, NodeHandshake, PuzzleRequest, ReorgDescription};
use std::collections::HashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

const HILBERT_ORDER: u32 = 16;
const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// The client-facing outcome of a `CMD_GET`: the wire protocol only ever
/// answers a client with `RESP_OK(DeliveryResponse)` or `RESP_ERROR` (spec.md
/// §3.4/§4.F.1) — there is no "pending" response shape, so the client
/// connection holds the request open until one of these is available.
pub enum ClientGetReply {
    Ready(DeliveryResponse),
    Error(String),
}

pub enum Command {
    ClientGet {
        cache_type: CacheType,
        semantic_id: String,
        query: QueryRectangle,
        respond_to: oneshot::Sender<ClientGetReply>,
    },
    NodeHello {
        node_id: u32,
        host: String,
        port: u16,
        handshake: NodeHandshake,
        control_tx: mpsc::UnboundedSender<ReorgDescription>,
    },
    NodeDisconnected {
        node_id: u32,
    },
    JobResultReady {
        cache_type: CacheType,
        job_id: u64,
        entry_id: u64,
        delivery: DeliveryResponse,
    },
    JobFailed {
        cache_type: CacheType,
        job_id: u64,
    },
    ClientAbort {
        job_id: u64,
    },
    Tick,
}

/// Coordinator state: one `IndexCache`/`QueryManager` pair per `CacheType`
/// (spec.md §3.3 — types never share a planning space), plus the node
/// registry and scheduler estimators shared across types.
pub struct IndexState {
    settings: Settings,
    caches: HashMap<CacheType, IndexCache>,
    query_managers: HashMap<CacheType, QueryManager>,
    nodes: HashMap<u32, Node>,
    scheduler: SchedulerState,
    /// Client connections waiting on a job's `RESP_RESULT_READY`/
    /// `RESP_DELIVERY_READY`, keyed by the job's own `(CacheType, JobId)`
    /// pair — a bare job id is only unique within its cache type, since
    /// each type's `QueryManager` counts independently.
    pending_replies: HashMap<(CacheType, u64), Vec<oneshot::Sender<ClientGetReply>>>,
}

impl IndexState {
    pub fn new(settings: Settings) -> Self {
        let mut caches = HashMap::new();
        let mut query_managers = HashMap::new();
        for ct in crate::cache::ALL_CACHE_TYPES {
            caches.insert(*ct, IndexCache::new());
            query_managers.insert(*ct, QueryManager::new());
        }
        Self {
            settings,
            caches,
            query_managers,
            nodes: HashMap::new(),
            scheduler: SchedulerState::new(),
            pending_replies: HashMap::new(),
        }
    }

    fn candidates(&self) -> Vec<NodeCandidate> {
        self.nodes
            .values()
            .map(|n| NodeCandidate {
                node_id: n.node_id,
                queue_len: 0,
                busy_workers: n.busy_workers as usize,
                idle_workers: n.idle_workers as usize,
            })
            .collect()
    }

    fn node_addrs(&self) -> HashMap<u32, NodeAddr> {
        self.nodes.iter().map(|(id, n)| (*id, NodeAddr { host: n.host.clone(), port: n.port })).collect()
    }

    /// Plans the request against the mirrored cache (spec.md §4.C) and
    /// turns it into a job carrying whatever the plan already covers:
    /// empty `parts` is a plain miss, a single full-hit part rides the
    /// same `CMD_CREATE` path (the owning node's own cache lookup short
    /// circuits it), and more than one part or any uncovered remainder
    /// becomes a `CMD_PUZZLE` dispatch. The reply is sent once the job's
    /// dispatch actually produces a `DeliveryResponse` — never before.
    fn handle_client_get(&mut self, cache_type: CacheType, semantic_id: &str, query: QueryRectangle, respond_to: oneshot::Sender<ClientGetReply>) {
        let cache = self.caches.entry(cache_type).or_default();
        let (result, lookup) = cache.plan(semantic_id, &query);

        let mut parts = Vec::with_capacity(result.keys.len());
        for &k in &result.keys {
            let key = lookup[k as usize];
            let Some(node) = self.nodes.get(&key.node_id) else { continue };
            let Some(entry) = cache.get(key) else { continue };
            parts.push(CacheRef { host: node.host.clone(), port: node.port, entry_id: key.entry_id, bounds: entry.meta.entry.bounds });
        }

        let remainder = if parts.len() > 1 || (!parts.is_empty() && !result.remainder.is_empty()) {
            result.remainder.clone()
        } else {
            Vec::new()
        };

        let qm = self.query_managers.entry(cache_type).or_default();
        let job_id = match qm.add_request(cache_type, semantic_id, query, parts, remainder) {
            AddRequestOutcome::Attached(id) | AddRequestOutcome::Extended(id) | AddRequestOutcome::Created(id) => id,
        };
        self.pending_replies.entry((cache_type, job_id)).or_default().push(respond_to);
    }

    fn schedule(&mut self, cache_type: CacheType) -> Vec<(crate::index::Job, u32)> {
        let candidates = self.candidates();
        let scheduler_kind = self.settings.index.scheduler;
        let scheduler = &self.scheduler;
        let nodes = &self.nodes;
        let qm = self.query_managers.entry(cache_type).or_default();
        qm.schedule_pending_jobs(
            scheduler,
            scheduler_kind,
            &candidates,
            |q| {
                let x = ((q.x1 + q.x2) / 2.0).clamp(-180.0, 180.0);
                let y = ((q.y1 + q.y2) / 2.0).clamp(-90.0, 90.0);
                let gx = ((x + 180.0) / 360.0 * ((1u64 << HILBERT_ORDER) as f64)) as u32;
                let gy = ((y + 90.0) / 180.0 * ((1u64 << HILBERT_ORDER) as f64)) as u32;
                hilbert_index(gx, gy, HILBERT_ORDER)
            },
            |job| job.parts.first().and_then(|p| nodes.values().find(|n| n.host == p.host && n.port == p.port).map(|n| n.node_id)),
        )
    }

    fn maybe_reorg(&mut self, cache_type: CacheType) {
        let usages: Vec<NodeUsage> = self
            .nodes
            .values()
            .map(|n| NodeUsage { node_id: n.node_id, used: n.used_for(cache_type), capacity: n.capacity_for(cache_type) })
            .collect();
        let kind = self.settings.index.reorg_strategy;
        if !reorg::requires_reorg(kind, &usages) {
            return;
        }
        let cache = self.caches.entry(cache_type).or_default();
        let addrs = self.node_addrs();
        let description = reorg::reorganize(kind, cache_type, cache, &usages, &addrs, self.settings.index.relevance);
        info!(moves = description.moves.len(), removals = description.removals.len(), ?cache_type, "reorg plan computed");
        if description.moves.is_empty() && description.removals.is_empty() {
            return;
        }
        // Every move/removal in the plan is broadcast to every node that
        // currently holds entries of this type; each node's own reorg
        // handling (not modeled here, it lives on the worker side) filters
        // down to the items that name it.
        for node in self.nodes.values() {
            if let Some(tx) = &node.control_tx {
                let _ = tx.send(description.clone());
            }
        }
    }
}

async fn handle_client_connection(mut stream: TcpStream, commands: mpsc::Sender<Command>) {
    let mut conn = crate::conn::ClientConnection::new();
    loop {
        let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "client connection read error");
                return;
            }
        };
        if frame.code != client_codes::CMD_GET {
            warn!(code = frame.code, "unexpected client command code");
            continue;
        }
        let req: BaseRequest = match frame.decode() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed client request");
                continue;
            }
        };
        if conn.on_cmd_get().is_err() {
            continue;
        }

        let (tx, rx) = oneshot::channel();
        if commands
            .send(Command::ClientGet { cache_type: req.cache_type, semantic_id: req.semantic_id, query: req.query, respond_to: tx })
            .await
            .is_err()
        {
            return;
        }
        let reply = rx.await.unwrap_or(ClientGetReply::Error("index actor unavailable".to_string()));

        conn.send_response().ok();
        match reply {
            ClientGetReply::Ready(delivery) => {
                if write_message(&mut stream, client_codes::RESP_OK, &delivery).await.is_err() {
                    return;
                }
            }
            ClientGetReply::Error(msg) => {
                if write_message(&mut stream, client_codes::RESP_ERROR, &msg).await.is_err() {
                    return;
                }
            }
        }
        conn.finish_write().ok();
    }
}

async fn handle_control_connection(mut stream: TcpStream, node_id: u32, commands: mpsc::Sender<Command>) {
    let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "control connection read error");
            return;
        }
    };
    if frame.code != control_codes::CMD_HELLO {
        warn!(code = frame.code, "expected CMD_HELLO as first control message");
        return;
    }
    let handshake: NodeHandshake = match frame.decode() {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "malformed hello");
            return;
        }
    };
    let peer = stream.peer_addr().ok();
    let host = peer.map(|a| a.ip().to_string()).unwrap_or_default();
    let port = handshake.port;

    let (reorg_tx, mut reorg_rx) = mpsc::unbounded_channel::<ReorgDescription>();
    if commands.send(Command::NodeHello { node_id, host, port, handshake, control_tx: reorg_tx }).await.is_err() {
        return;
    }

    let (mut read_half, mut write_half) = stream.into_split();
    let writer = tokio::spawn(async move {
        while let Some(description) = reorg_rx.recv().await {
            if write_message(&mut write_half, control_codes::CMD_REORG, &description).await.is_err() {
                return;
            }
        }
    });

    // Responses (moved-item acks, stats) stream back on the same
    // connection but aren't consumed by anything yet — just enough
    // reading to detect disconnect.
    loop {
        match read_frame(&mut read_half, MAX_FRAME_SIZE).await {
            Ok(_) => {}
            Err(_) => {
                writer.abort();
                let _ = commands.send(Command::NodeDisconnected { node_id }).await;
                return;
            }
        }
    }
}

/// Carries a scheduled job to the node it was placed on, driving
/// `conn::WorkerConnection`'s FSM through the full happy path (spec.md
/// §4.F.2): send `CMD_CREATE` or `CMD_PUZZLE` depending on the plan,
/// await `RESP_NEW_CACHE_ENTRY`, then follow up on the same connection
/// with `CMD_DELIVER` so the node hands back a real `DeliveryResponse`
/// for every client batched onto the job. Spawned once per dispatch from
/// the `Tick` handler; the job's own lifetime in the query manager
/// tables doesn't depend on this task succeeding quickly.
async fn dispatch_job(job: crate::index::Job, cache_type: CacheType, addr: (String, u16), commands: mpsc::Sender<Command>) {
    let job_id = job.id;
    let waiting_clients = job.waiting_clients.max(1);
    let is_puzzle = job.is_puzzle();
    let base = BaseRequest { cache_type, semantic_id: job.semantic_id.clone(), query: job.query.clone() };
    let mut conn = crate::conn::WorkerConnection::new();

    let outcome: Result<(u64, DeliveryResponse), GeocacheError> = async {
        let mut stream = TcpStream::connect((addr.0.as_str(), addr.1)).await.map_err(|e| GeocacheError::Wire(e.into()))?;

        conn.send_job()?;
        if is_puzzle {
            let req = PuzzleRequest { base: base.clone(), parts: job.parts.clone(), remainder: job.remainder.clone() };
            write_message(&mut stream, worker_codes::CMD_PUZZLE, &req).await?;
        } else {
            write_message(&mut stream, worker_codes::CMD_CREATE, &base).await?;
        }
        conn.job_write_done()?;

        let frame = read_frame(&mut stream, MAX_FRAME_SIZE).await?;
        if frame.code != worker_codes::RESP_NEW_CACHE_ENTRY {
            conn.on_error();
            let msg: String = frame.decode().unwrap_or_else(|_| "node returned an error".to_string());
            return Err(GeocacheError::Internal(msg));
        }
        let entry_id: u64 = frame.decode()?;
        conn.on_result_ready()?;

        conn.send_delivery_qty()?;
        let delivery_req = DeliveryRequest { base, entry_id, count: waiting_clients };
        write_message(&mut stream, worker_codes::CMD_DELIVER, &delivery_req).await?;
        conn.delivery_qty_write_done()?;

        let frame = read_frame(&mut stream, MAX_FRAME_SIZE).await?;
        if frame.code != worker_codes::RESP_DELIVERY_QTY {
            conn.on_error();
            let msg: String = frame.decode().unwrap_or_else(|_| "node returned an error".to_string());
            return Err(GeocacheError::Internal(msg));
        }
        let delivery: DeliveryResponse = frame.decode()?;
        conn.on_delivery_ready()?;
        conn.release()?;

        Ok((entry_id, delivery))
    }
    .await;

    match outcome {
        Ok((entry_id, delivery)) => {
            let _ = commands.send(Command::JobResultReady { cache_type, job_id, entry_id, delivery }).await;
        }
        Err(e) => {
            warn!(job_id, error = %e, "job dispatch failed");
            let _ = commands.send(Command::JobFailed { cache_type, job_id }).await;
        }
    }
}

pub async fn run(settings: Settings) -> Result<(), GeocacheError> {
    let mut state = IndexState::new(settings.clone());
    let (tx, mut rx) = mpsc::channel::<Command>(1024);

    let client_listener = TcpListener::bind(("0.0.0.0", settings.index.port))
        .await
        .map_err(|e| GeocacheError::Wire(e.into()))?;
    let control_listener = TcpListener::bind(("0.0.0.0", settings.index.port + 1))
        .await
        .map_err(|e| GeocacheError::Wire(e.into()))?;
    info!(port = settings.index.port, "index listening for clients");

    let client_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            match client_listener.accept().await {
                Ok((stream, _)) => {
                    let tx = client_tx.clone();
                    tokio::spawn(handle_client_connection(stream, tx));
                }
                Err(e) => warn!(error = %e, "client accept error"),
            }
        }
    });

    let control_tx = tx.clone();
    tokio::spawn(async move {
        let mut next_node_id = 1u32;
        loop {
            match control_listener.accept().await {
                Ok((stream, _)) => {
                    let node_id = next_node_id;
                    next_node_id += 1;
                    let tx = control_tx.clone();
                    tokio::spawn(handle_control_connection(stream, node_id, tx));
                }
                Err(e) => warn!(error = %e, "control accept error"),
            }
        }
    });

    let tick_tx = tx.clone();
    let interval_ms = settings.index.update_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            if tick_tx.send(Command::Tick).await.is_err() {
                return;
            }
        }
    });

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::ClientGet { cache_type, semantic_id, query, respond_to } => {
                state.handle_client_get(cache_type, &semantic_id, query, respond_to);
            }
            Command::NodeHello { node_id, host, port, handshake, control_tx } => {
                let mut node = Node::new(node_id, host, port, handshake.capacity_per_type, settings.node.num_workers as u32);
                node.control_tx = Some(control_tx);
                for meta in handshake.entries {
                    node.used_per_type
                        .entry(meta.key.cache_type)
                        .and_modify(|u| *u += meta.entry.size_bytes)
                        .or_insert(meta.entry.size_bytes);
                    state.caches.entry(meta.key.cache_type).or_default().insert_announced(node_id, meta);
                }
                state.nodes.insert(node_id, node);
                info!(node_id, "node registered");
            }
            Command::NodeDisconnected { node_id } => {
                state.nodes.remove(&node_id);
                for (cache_type, cache) in state.caches.iter_mut() {
                    let purged = cache.purge_node(node_id);
                    if !purged.is_empty() {
                        warn!(node_id, ?cache_type, count = purged.len(), "purged entries after node disconnect");
                    }
                }
                for qm in state.query_managers.values_mut() {
                    qm.node_failed(node_id);
                }
            }
            Command::JobResultReady { cache_type, job_id, entry_id, delivery } => {
                if let Some(qm) = state.query_managers.get_mut(&cache_type) {
                    qm.mark_finished(job_id, entry_id);
                    qm.take_finished(job_id);
                }
                if let Some(senders) = state.pending_replies.remove(&(cache_type, job_id)) {
                    for tx in senders {
                        let _ = tx.send(ClientGetReply::Ready(delivery.clone()));
                    }
                }
            }
            Command::JobFailed { cache_type, job_id } => {
                if let Some(qm) = state.query_managers.get_mut(&cache_type) {
                    qm.worker_socket_died(job_id);
                }
            }
            Command::ClientAbort { job_id } => {
                for qm in state.query_managers.values_mut() {
                    qm.client_abort(job_id);
                }
            }
            Command::Tick => {
                let types: Vec<CacheType> = state.caches.keys().copied().collect();
                for ct in types {
                    let dispatched = state.schedule(ct);
                    for (job, node_id) in dispatched {
                        if let Some(addr) = state.nodes.get(&node_id).map(|n| (n.host.clone(), n.port)) {
                            let dispatch_tx = tx.clone();
                            tokio::spawn(dispatch_job(job, ct, addr, dispatch_tx));
                        }
                    }
                    state.maybe_reorg(ct);
                }
            }
        }
    }

    Ok(())
}
