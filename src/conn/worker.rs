//! Index ↔ worker connection state machine (spec.md §4.F.2). Magic
//! `0x32345678`.

use crate::error::ProtocolStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    SendingRequest,
    Processing,
    QueryRequested,
    SendingQueryResponse,
    NewEntry,
    Done,
    SendingDeliveryQty,
    WaitingDelivery,
    DeliveryReady,
    Error,
}

/// Happy path: `Idle -> SendingRequest -> Processing`. While `Processing`
/// the worker may interleave any number of `QueryRequested`/`NewEntry`
/// round trips before reporting `RESP_RESULT_READY`.
pub struct WorkerConnection {
    state: WorkerState,
}

impl Default for WorkerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerConnection {
    pub fn new() -> Self {
        Self { state: WorkerState::Idle }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn require(&self, expected: WorkerState, op: &'static str) -> Result<(), ProtocolStateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolStateError { operation: op, state: self.state_name() })
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            WorkerState::Idle => "Idle",
            WorkerState::SendingRequest => "SendingRequest",
            WorkerState::Processing => "Processing",
            WorkerState::QueryRequested => "QueryRequested",
            WorkerState::SendingQueryResponse => "SendingQueryResponse",
            WorkerState::NewEntry => "NewEntry",
            WorkerState::Done => "Done",
            WorkerState::SendingDeliveryQty => "SendingDeliveryQty",
            WorkerState::WaitingDelivery => "WaitingDelivery",
            WorkerState::DeliveryReady => "DeliveryReady",
            WorkerState::Error => "Error",
        }
    }

    /// Index dispatches `CMD_CREATE`/`CMD_DELIVER`/`CMD_PUZZLE`.
    pub fn send_job(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Idle, "send_job")?;
        self.state = WorkerState::SendingRequest;
        Ok(())
    }

    pub fn job_write_done(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::SendingRequest, "job_write_done")?;
        self.state = WorkerState::Processing;
        Ok(())
    }

    pub fn on_query_cache(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Processing, "CMD_QUERY_CACHE")?;
        self.state = WorkerState::QueryRequested;
        Ok(())
    }

    pub fn send_query_response(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::QueryRequested, "send_query_response")?;
        self.state = WorkerState::SendingQueryResponse;
        Ok(())
    }

    pub fn query_response_write_done(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::SendingQueryResponse, "query_response_write_done")?;
        self.state = WorkerState::Processing;
        Ok(())
    }

    pub fn on_new_cache_entry(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Processing, "RESP_NEW_CACHE_ENTRY")?;
        self.state = WorkerState::NewEntry;
        Ok(())
    }

    pub fn new_entry_ack(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::NewEntry, "new_entry_ack")?;
        self.state = WorkerState::Processing;
        Ok(())
    }

    pub fn on_result_ready(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Processing, "RESP_RESULT_READY")?;
        self.state = WorkerState::Done;
        Ok(())
    }

    /// Index replies `RESP_DELIVERY_QTY(qty)`.
    pub fn send_delivery_qty(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Done, "send_delivery_qty")?;
        self.state = WorkerState::SendingDeliveryQty;
        Ok(())
    }

    pub fn delivery_qty_write_done(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::SendingDeliveryQty, "delivery_qty_write_done")?;
        self.state = WorkerState::WaitingDelivery;
        Ok(())
    }

    pub fn on_delivery_ready(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::WaitingDelivery, "RESP_DELIVERY_READY")?;
        self.state = WorkerState::DeliveryReady;
        Ok(())
    }

    /// Job complete; the worker is released back to idle.
    pub fn release(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::DeliveryReady, "release")?;
        self.state = WorkerState::Idle;
        Ok(())
    }

    /// A `RESP_ERROR` or a protocol violation enters `Error` from any state.
    pub fn on_error(&mut self) {
        self.state = WorkerState::Error;
    }

    /// After the caller has handled the error (re-enqueued the job,
    /// notified clients), the connection returns to `Idle`.
    pub fn recover_from_error(&mut self) -> Result<(), ProtocolStateError> {
        self.require(WorkerState::Error, "recover_from_error")?;
        self.state = WorkerState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_job_to_delivery_ready() {
        let mut w = WorkerConnection::new();
        w.send_job().unwrap();
        w.job_write_done().unwrap();
        assert_eq!(w.state(), WorkerState::Processing);
        w.on_result_ready().unwrap();
        w.send_delivery_qty().unwrap();
        w.delivery_qty_write_done().unwrap();
        w.on_delivery_ready().unwrap();
        w.release().unwrap();
        assert_eq!(w.state(), WorkerState::Idle);
    }

    #[test]
    fn query_cache_round_trip_returns_to_processing() {
        let mut w = WorkerConnection::new();
        w.send_job().unwrap();
        w.job_write_done().unwrap();
        w.on_query_cache().unwrap();
        w.send_query_response().unwrap();
        w.query_response_write_done().unwrap();
        assert_eq!(w.state(), WorkerState::Processing);
    }

    #[test]
    fn error_can_be_entered_and_recovered_from_any_state() {
        let mut w = WorkerConnection::new();
        w.send_job().unwrap();
        w.on_error();
        assert_eq!(w.state(), WorkerState::Error);
        w.recover_from_error().unwrap();
        assert_eq!(w.state(), WorkerState::Idle);
    }
}
