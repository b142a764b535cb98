//! Crate-wide error taxonomy.
//!
//! Failure domains mirror the protocol's own notion of recoverability: wire
//! and protocol errors close a connection, cache misses are absorbed
//! silently, and only a handful of kinds ever reach a client as
//! `RESP_ERROR`. See the error-handling design in SPEC_FULL.md §7.

use thiserror::Error;

/// Malformed or truncated framing on a connection.
#[derive(Error, Debug)]
pub enum WireFramingError {
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: u64, got: u64 },

    #[error("unknown magic number: {0:#x}")]
    UnknownMagic(u32),

    #[error("unknown command code {code} for role {role} in state {state}")]
    UnknownCommand {
        code: u8,
        role: &'static str,
        state: &'static str,
    },

    #[error("frame exceeds maximum size: {0} bytes")]
    FrameTooLarge(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("payload serialization error: {0}")]
    Serialization(String),
}

/// A connection FSM method was invoked outside of the state that allows it.
#[derive(Error, Debug)]
#[error("protocol state error: {operation} invalid in state {state}")]
pub struct ProtocolStateError {
    pub operation: &'static str,
    pub state: &'static str,
}

/// A remote delivery endpoint returned an error or unrecognized response.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("delivery error: {0}")]
    Remote(String),

    #[error("unknown response code {0}")]
    UnknownResponse(u8),

    #[error("invalid delivery id: {0}")]
    InvalidDeliveryId(u64),
}

/// A read/write exceeded an imposed deadline.
#[derive(Error, Debug)]
#[error("operation timed out after {0:?}")]
pub struct TimeoutError(pub std::time::Duration);

/// A caller-supplied field violated its contract (non-monotonic interval,
/// negative capacity, ...).
#[derive(Error, Debug)]
pub enum InvalidArgument {
    #[error("invalid interval: {a} > {b}")]
    InvalidInterval { a: f64, b: f64 },

    #[error("invalid argument: {0}")]
    Other(String),
}

/// The external operator-graph engine failed to produce a result.
#[derive(Error, Debug)]
#[error("operator graph evaluation failed: {0}")]
pub struct OperatorError(pub String);

/// A node's control connection died; its entries and jobs must be purged
/// and rescheduled respectively.
#[derive(Error, Debug)]
#[error("node {0} failed")]
pub struct NodeFailure(pub u32);

/// A `put` would push a `NodeCache` beyond 1.1x its configured capacity.
#[derive(Error, Debug)]
#[error("cache capacity exceeded: attempted {attempted} bytes, limit {limit} bytes")]
pub struct CapacityExceeded {
    pub attempted: u64,
    pub limit: u64,
}

/// Top-level error type returned to callers that need to distinguish
/// failure domains (e.g. the query manager, or a client connection
/// producing `RESP_ERROR`).
#[derive(Error, Debug)]
pub enum GeocacheError {
    #[error(transparent)]
    Wire(#[from] WireFramingError),

    #[error(transparent)]
    ProtocolState(#[from] ProtocolStateError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error(transparent)]
    NodeFailure(#[from] NodeFailure),

    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GeocacheError {
    /// Text sent back on `RESP_ERROR`. The wire protocol carries only a
    /// string (§7); clients distinguish transient vs. permanent failures
    /// textually.
    pub fn as_wire_message(&self) -> String {
        self.to_string()
    }
}

pub type GeocacheResult<T> = Result<T, GeocacheError>;
