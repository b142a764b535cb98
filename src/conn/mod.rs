//! Per-role connection state machines (spec.md §4.F). Pure state-transition
//! logic. `ClientConnection`, `WorkerConnection`, and `DeliveryConnection`
//! are driven by the owning event loop (`index::server`, `node::server`) at
//! the points described in each FSM's docs. `ControlConnection` models the
//! full control-connection lifecycle from one side's perspective, but the
//! control connection as actually implemented splits hello-sending (node)
//! from reorg-sending (index) across the two ends, so no single side drives
//! the whole FSM; the real traffic goes through direct `match frame.code`
//! dispatch in `index::server::handle_control_connection` and
//! `node::server::handle_control_stream` instead. Kept here, tested in
//! isolation, as the spec-grounded description of that connection's states.

pub mod client;
pub mod control;
pub mod delivery;
pub mod worker;

pub use client::{ClientConnection, ClientState};
pub use control::{ControlConnection, ControlState};
pub use delivery::{DeliveryConnection, DeliveryState};
pub use worker::{WorkerConnection, WorkerState};
