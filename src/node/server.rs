//! Worker node event loop (spec.md §5.1, §4.D, §4.I): owns the node's
//! caches and pending deliveries behind one actor task, mirroring the
//! index's own single-owner-plus-channel shape in `index::server`.

use crate::cache::{CacheCube, CacheType};
use crate::config::NodeConfig;
use crate::error::GeocacheError;
use crate::node::cache_manager::NodeCacheManager;
use crate::node::delivery::DeliveryManager;
use crate::node::puzzle::{self, RemainderSource};
use crate::payload::{FeatureCollection, Payload, RasterTile};
use crate::wire::codes::{delivery as delivery_codes, worker as worker_codes};
use crate::wire::framing::{read_frame, write_message};
use crate::wire::messages::{BaseRequest, DeliveryRequest, DeliveryResponse, NodeHandshake, PuzzleRequest, ReorgDescription};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Placeholder for the real operator-graph compute engine: the spec
/// treats query evaluation as an external system this module calls
/// through, not something the cache layer implements. Returns empty
/// results so the puzzle executor's reassembly logic is still exercised
/// end to end.
struct NoopRemainderSource;

impl RemainderSource for NoopRemainderSource {
    fn compute_raster(&self, cube: &crate::geometry::Cube3, psx: f64, psy: f64) -> Result<RasterTile, GeocacheError> {
        let w = if psx > 0.0 { ((cube.x.b - cube.x.a) / psx).round() as usize } else { 0 };
        let h = if psy > 0.0 { ((cube.y.b - cube.y.a) / psy).round() as usize } else { 0 };
        Ok(RasterTile::new(cube.x.a, cube.y.a, psx, psy, w.max(1), h.max(1), f64::NAN))
    }

    fn compute_features(&self, _cube: &crate::geometry::Cube3) -> Result<FeatureCollection, GeocacheError> {
        Ok(FeatureCollection::empty())
    }
}

pub enum JobOutcome {
    Ready { entry_id: u64 },
    Error(String),
}

pub enum Command {
    RunQuery { req: BaseRequest, respond_to: oneshot::Sender<JobOutcome> },
    RunPuzzle { req: PuzzleRequest, respond_to: oneshot::Sender<JobOutcome> },
    PrepareDelivery { entry_id: u64, cache_type: CacheType, semantic_id: String, count: u32, respond_to: oneshot::Sender<Option<u64>> },
    PickupDelivery { delivery_id: u64, respond_to: oneshot::Sender<Option<Arc<Payload>>> },
    ApplyReorg(ReorgDescription),
    Tick,
}

pub struct NodeState {
    config: NodeConfig,
    caches: NodeCacheManager,
    deliveries: DeliveryManager,
    remainder_source: NoopRemainderSource,
}

impl NodeState {
    pub fn new(config: NodeConfig) -> Self {
        let caches = NodeCacheManager::new(&config);
        Self { config, caches, deliveries: DeliveryManager::new(), remainder_source: NoopRemainderSource }
    }

    fn handshake(&self) -> NodeHandshake {
        NodeHandshake {
            port: self.config.port,
            capacity_per_type: self.caches.capacity_summary(&self.config),
            entries: Vec::new(),
        }
    }

    async fn run_query(&mut self, req: &BaseRequest) -> JobOutcome {
        let result = self.caches.query(req.cache_type, &req.semantic_id, &req.query);
        if result.is_full_hit() {
            if let Some(&entry_id) = result.keys.first() {
                return JobOutcome::Ready { entry_id };
            }
        }
        // A miss at the node: synthesize the whole query as one remainder
        // and run it straight through the puzzle executor with no parts.
        let puzzle_req = PuzzleRequest { base: req.clone(), parts: Vec::new(), remainder: vec![req.query.cube()] };
        self.run_puzzle_inner(&puzzle_req).await
    }

    /// Applies a reorg plan's share that names this node: drop entries
    /// listed as removals, and drop the source side of any move whose
    /// `from_host`/`from_port` is this node (the transfer to the
    /// destination node is carried by the operator-graph/delivery layer
    /// outside this module; here we only retire the source copy once the
    /// plan says the move happened).
    fn apply_reorg(&mut self, description: &ReorgDescription) {
        for removal in &description.removals {
            if self.caches.remove(removal.cache_type, &removal.semantic_id, removal.entry_id) {
                info!(cache_type = ?removal.cache_type, semantic_id = %removal.semantic_id, entry_id = removal.entry_id, "reorg removed entry");
            }
        }
        for mv in &description.moves {
            if mv.from_host == self.config.host && mv.from_port == self.config.port {
                if self.caches.remove(mv.cache_type, &mv.semantic_id, mv.entry_id) {
                    info!(cache_type = ?mv.cache_type, semantic_id = %mv.semantic_id, entry_id = mv.entry_id, "reorg moved entry away from this node");
                }
            }
        }
    }

    async fn run_puzzle_inner(&mut self, req: &PuzzleRequest) -> JobOutcome {
        match puzzle::execute(req, &self.caches, &self.remainder_source, &self.config.host, self.config.port).await {
            Ok(payload) => {
                let bounds = CacheCube {
                    query: req.base.query.query_cube(),
                    resolution_info: crate::cache::entry::ResolutionInfo::none(),
                };
                match self.caches.put(req.base.cache_type, &req.base.semantic_id, bounds, payload) {
                    Some(entry_id) => JobOutcome::Ready { entry_id },
                    None => JobOutcome::Error("node cache is over capacity".to_string()),
                }
            }
            Err(e) => JobOutcome::Error(e.as_wire_message()),
        }
    }
}

async fn handle_worker_connection(mut stream: TcpStream, commands: mpsc::Sender<Command>, delivery_host: String, delivery_port: u16) {
    loop {
        let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "worker connection read error");
                return;
            }
        };
        let (tx, rx) = oneshot::channel();
        let sent = match frame.code {
            worker_codes::CMD_CREATE => {
                let req: BaseRequest = match frame.decode() {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "malformed CMD_CREATE");
                        continue;
                    }
                };
                commands.send(Command::RunQuery { req, respond_to: tx }).await
            }
            worker_codes::CMD_PUZZLE => {
                let req: PuzzleRequest = match frame.decode() {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "malformed CMD_PUZZLE");
                        continue;
                    }
                };
                commands.send(Command::RunPuzzle { req, respond_to: tx }).await
            }
            worker_codes::CMD_DELIVER => {
                let req: DeliveryRequest = match frame.decode() {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "malformed CMD_DELIVER");
                        continue;
                    }
                };
                let (dtx, drx) = oneshot::channel();
                if commands
                    .send(Command::PrepareDelivery {
                        entry_id: req.entry_id,
                        cache_type: req.base.cache_type,
                        semantic_id: req.base.semantic_id.clone(),
                        count: req.count,
                        respond_to: dtx,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                let reply = match drx.await {
                    Ok(Some(delivery_id)) => {
                        let resp = DeliveryResponse { host: delivery_host.clone(), port: delivery_port, delivery_id };
                        write_message(&mut stream, worker_codes::RESP_DELIVERY_QTY, &resp).await
                    }
                    _ => write_message(&mut stream, worker_codes::RESP_ERROR, &"entry not found".to_string()).await,
                };
                if reply.is_err() {
                    return;
                }
                continue;
            }
            other => {
                warn!(code = other, "unexpected worker command code");
                continue;
            }
        };
        if sent.is_err() {
            return;
        }
        let outcome = rx.await.unwrap_or(JobOutcome::Error("node actor unavailable".to_string()));
        let result = match outcome {
            JobOutcome::Ready { entry_id } => write_message(&mut stream, worker_codes::RESP_NEW_CACHE_ENTRY, &entry_id).await,
            JobOutcome::Error(msg) => write_message(&mut stream, worker_codes::RESP_ERROR, &msg).await,
        };
        if result.is_err() {
            return;
        }
    }
}

async fn handle_delivery_connection(mut stream: TcpStream, commands: mpsc::Sender<Command>) {
    let mut conn = crate::conn::DeliveryConnection::new();
    let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
        Ok(f) => f,
        Err(_) => return,
    };
    if frame.code != delivery_codes::CMD_GET_CACHED_ITEM {
        warn!(code = frame.code, "unexpected delivery command code");
        return;
    }
    if conn.on_cmd_get_cached_item().is_err() {
        return;
    }
    let delivery_id: u64 = match frame.decode() {
        Ok(id) => id,
        Err(_) => return,
    };
    let (tx, rx) = oneshot::channel();
    if commands.send(Command::PickupDelivery { delivery_id, respond_to: tx }).await.is_err() {
        return;
    }
    match rx.await {
        Ok(Some(payload)) => {
            if conn.send_cache_entry().is_err() {
                return;
            }
            let _ = write_message(&mut stream, delivery_codes::RESP_CACHED_ITEM, payload.as_ref()).await;
        }
        _ => {
            conn.send_error();
            let _ = write_message(&mut stream, delivery_codes::RESP_ERROR, &"unknown or expired delivery id".to_string()).await;
        }
    }
    let _ = conn.finish_write();
}

/// Reads `CMD_REORG` frames off the node's outbound control connection to
/// the index for as long as it stays open, forwarding each one to the
/// actor. The connection closing means the index disappeared or dropped
/// us; there's nothing to reconnect to here, the process just stops
/// acting on reorgs until it's restarted against a live index.
async fn handle_control_stream(mut stream: TcpStream, _config: NodeConfig, commands: mpsc::Sender<Command>) {
    use crate::wire::codes::control as control_codes;
    loop {
        let frame = match read_frame(&mut stream, MAX_FRAME_SIZE).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "control connection to index closed");
                return;
            }
        };
        if frame.code != control_codes::CMD_REORG {
            warn!(code = frame.code, "unexpected control command code");
            continue;
        }
        let description: ReorgDescription = match frame.decode() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "malformed CMD_REORG");
                continue;
            }
        };
        if commands.send(Command::ApplyReorg(description)).await.is_err() {
            return;
        }
    }
}

pub async fn run(config: NodeConfig, index_host: String, index_control_port: u16) -> Result<(), GeocacheError> {
    let mut state = NodeState::new(config.clone());
    let (tx, mut rx) = mpsc::channel::<Command>(1024);

    let worker_listener = TcpListener::bind((config.host.as_str(), config.port)).await.map_err(|e| GeocacheError::Wire(e.into()))?;
    let delivery_listener = TcpListener::bind((config.host.as_str(), config.port + 1)).await.map_err(|e| GeocacheError::Wire(e.into()))?;
    info!(port = config.port, "node listening for worker jobs");

    let worker_tx = tx.clone();
    let delivery_host = config.host.clone();
    let delivery_port = config.port + 1;
    tokio::spawn(async move {
        loop {
            match worker_listener.accept().await {
                Ok((stream, _)) => {
                    let tx = worker_tx.clone();
                    tokio::spawn(handle_worker_connection(stream, tx, delivery_host.clone(), delivery_port));
                }
                Err(e) => warn!(error = %e, "worker accept error"),
            }
        }
    });

    let delivery_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            match delivery_listener.accept().await {
                Ok((stream, _)) => {
                    let tx = delivery_tx.clone();
                    tokio::spawn(handle_delivery_connection(stream, tx));
                }
                Err(e) => warn!(error = %e, "delivery accept error"),
            }
        }
    });

    {
        let handshake = state.handshake();
        let node_config = config.clone();
        let control_tx = tx.clone();
        match TcpStream::connect((index_host.as_str(), index_control_port)).await {
            Ok(mut control_stream) => {
                use crate::wire::codes::control as control_codes;
                if let Err(e) = write_message(&mut control_stream, control_codes::CMD_HELLO, &handshake).await {
                    warn!(error = %e, "failed to register with index");
                } else {
                    // The control connection stays open for the node's
                    // lifetime: the index pushes CMD_REORG frames down it
                    // whenever a reorg plan touches this node.
                    tokio::spawn(handle_control_stream(control_stream, node_config, control_tx));
                }
            }
            Err(e) => warn!(error = %e, "could not connect to index control port"),
        }
    }

    let tick_tx = tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            if tick_tx.send(Command::Tick).await.is_err() {
                return;
            }
        }
    });

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::RunQuery { req, respond_to } => {
                let outcome = state.run_query(&req).await;
                let _ = respond_to.send(outcome);
            }
            Command::RunPuzzle { req, respond_to } => {
                let outcome = state.run_puzzle_inner(&req).await;
                let _ = respond_to.send(outcome);
            }
            Command::PrepareDelivery { entry_id, cache_type, semantic_id, count, respond_to } => {
                let payload = state.caches.get(cache_type, &semantic_id, entry_id);
                let id = payload.map(|p| state.deliveries.add(p, count));
                let _ = respond_to.send(id);
            }
            Command::PickupDelivery { delivery_id, respond_to } => {
                let payload = state.deliveries.get(delivery_id);
                let _ = respond_to.send(payload);
            }
            Command::ApplyReorg(description) => {
                state.apply_reorg(&description);
            }
            Command::Tick => {
                let swept = state.deliveries.sweep_expired();
                if swept > 0 {
                    info!(swept, "expired unclaimed deliveries");
                }
            }
        }
    }

    Ok(())
}
