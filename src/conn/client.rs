//! Client ↔ index connection state machine (spec.md §4.F.1). Magic
//! `0x22345678`.

use crate::error::ProtocolStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    AwaitResponse,
    AwaitStats,
    AwaitReset,
    WritingResponse,
    WritingStats,
    WritingRst,
}

/// Exactly one outstanding request per client connection (spec.md §4.F.1).
pub struct ClientConnection {
    state: ClientState,
}

impl Default for ClientConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConnection {
    pub fn new() -> Self {
        Self { state: ClientState::Idle }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    fn require(&self, expected: ClientState, op: &'static str) -> Result<(), ProtocolStateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolStateError { operation: op, state: self.state_name() })
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            ClientState::Idle => "Idle",
            ClientState::AwaitResponse => "AwaitResponse",
            ClientState::AwaitStats => "AwaitStats",
            ClientState::AwaitReset => "AwaitReset",
            ClientState::WritingResponse => "WritingResponse",
            ClientState::WritingStats => "WritingStats",
            ClientState::WritingRst => "WritingRst",
        }
    }

    pub fn on_cmd_get(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::Idle, "CMD_GET")?;
        self.state = ClientState::AwaitResponse;
        Ok(())
    }

    pub fn on_cmd_get_stats(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::Idle, "CMD_GET_STATS")?;
        self.state = ClientState::AwaitStats;
        Ok(())
    }

    pub fn on_cmd_reset_stats(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::Idle, "CMD_RESET_STATS")?;
        self.state = ClientState::AwaitReset;
        Ok(())
    }

    /// `RESP_OK` or `RESP_ERROR`; only valid while awaiting a `CMD_GET` response.
    pub fn send_response(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::AwaitResponse, "send_response")?;
        self.state = ClientState::WritingResponse;
        Ok(())
    }

    pub fn send_stats(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::AwaitStats, "send_stats")?;
        self.state = ClientState::WritingStats;
        Ok(())
    }

    pub fn send_resetted(&mut self) -> Result<(), ProtocolStateError> {
        self.require(ClientState::AwaitReset, "send_resetted")?;
        self.state = ClientState::WritingRst;
        Ok(())
    }

    /// The outgoing frame write has completed; back to `Idle`.
    pub fn finish_write(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            ClientState::WritingResponse | ClientState::WritingStats | ClientState::WritingRst => {
                self.state = ClientState::Idle;
                Ok(())
            }
            _ => Err(ProtocolStateError { operation: "finish_write", state: self.state_name() }),
        }
    }

    /// Closing the stream at any state resets the FSM to a dead state;
    /// the owner is expected to drop the connection (spec.md §4.F.5).
    pub fn on_close(&mut self) {
        self.state = ClientState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_get_request() {
        let mut c = ClientConnection::new();
        c.on_cmd_get().unwrap();
        assert_eq!(c.state(), ClientState::AwaitResponse);
        c.send_response().unwrap();
        assert_eq!(c.state(), ClientState::WritingResponse);
        c.finish_write().unwrap();
        assert_eq!(c.state(), ClientState::Idle);
    }

    #[test]
    fn second_request_while_outstanding_is_rejected() {
        let mut c = ClientConnection::new();
        c.on_cmd_get().unwrap();
        assert!(c.on_cmd_get().is_err());
    }

    #[test]
    fn send_response_outside_await_response_is_rejected() {
        let mut c = ClientConnection::new();
        assert!(c.send_response().is_err());
        c.on_cmd_get_stats().unwrap();
        assert!(c.send_response().is_err());
    }
}
