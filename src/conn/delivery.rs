//! Worker ↔ worker delivery connection state machine (spec.md §4.F.4).
//! Magic `0x52345678`. Also serves client pickup (`CMD_GET`).

use crate::error::ProtocolStateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    DeliveryRequestRead,
    CacheRequestRead,
    MoveRequestRead,
    Sending,
    SendingCacheEntry,
    SendingMove,
    AwaitingMoveConfirm,
    MoveDone,
    SendingError,
}

pub struct DeliveryConnection {
    state: DeliveryState,
}

impl Default for DeliveryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryConnection {
    pub fn new() -> Self {
        Self { state: DeliveryState::Idle }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    fn require(&self, expected: DeliveryState, op: &'static str) -> Result<(), ProtocolStateError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolStateError { operation: op, state: self.state_name() })
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            DeliveryState::Idle => "Idle",
            DeliveryState::DeliveryRequestRead => "DeliveryRequestRead",
            DeliveryState::CacheRequestRead => "CacheRequestRead",
            DeliveryState::MoveRequestRead => "MoveRequestRead",
            DeliveryState::Sending => "Sending",
            DeliveryState::SendingCacheEntry => "SendingCacheEntry",
            DeliveryState::SendingMove => "SendingMove",
            DeliveryState::AwaitingMoveConfirm => "AwaitingMoveConfirm",
            DeliveryState::MoveDone => "MoveDone",
            DeliveryState::SendingError => "SendingError",
        }
    }

    pub fn on_cmd_get(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::Idle, "CMD_GET")?;
        self.state = DeliveryState::DeliveryRequestRead;
        Ok(())
    }

    pub fn send_delivery(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::DeliveryRequestRead, "send_delivery")?;
        self.state = DeliveryState::Sending;
        Ok(())
    }

    pub fn on_cmd_get_cached_item(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::Idle, "CMD_GET_CACHED_ITEM")?;
        self.state = DeliveryState::CacheRequestRead;
        Ok(())
    }

    pub fn send_cache_entry(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::CacheRequestRead, "send_cache_entry")?;
        self.state = DeliveryState::SendingCacheEntry;
        Ok(())
    }

    pub fn on_cmd_move_item(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::Idle, "CMD_MOVE_ITEM")?;
        self.state = DeliveryState::MoveRequestRead;
        Ok(())
    }

    pub fn send_move(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::MoveRequestRead, "send_move")?;
        self.state = DeliveryState::SendingMove;
        Ok(())
    }

    pub fn move_write_done(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::SendingMove, "move_write_done")?;
        self.state = DeliveryState::AwaitingMoveConfirm;
        Ok(())
    }

    /// The peer confirms with `CMD_MOVE_DONE`; the source entry is dropped
    /// only after this confirmation arrives.
    pub fn on_move_done(&mut self) -> Result<(), ProtocolStateError> {
        self.require(DeliveryState::AwaitingMoveConfirm, "CMD_MOVE_DONE")?;
        self.state = DeliveryState::MoveDone;
        Ok(())
    }

    pub fn send_error(&mut self) {
        self.state = DeliveryState::SendingError;
    }

    /// Any outstanding write has completed; return to `Idle` for the next command.
    pub fn finish_write(&mut self) -> Result<(), ProtocolStateError> {
        match self.state {
            DeliveryState::Sending
            | DeliveryState::SendingCacheEntry
            | DeliveryState::MoveDone
            | DeliveryState::SendingError => {
                self.state = DeliveryState::Idle;
                Ok(())
            }
            _ => Err(ProtocolStateError { operation: "finish_write", state: self.state_name() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_pickup_round_trip() {
        let mut d = DeliveryConnection::new();
        d.on_cmd_get().unwrap();
        d.send_delivery().unwrap();
        d.finish_write().unwrap();
        assert_eq!(d.state(), DeliveryState::Idle);
    }

    #[test]
    fn move_item_requires_confirm_before_returning_to_idle() {
        let mut d = DeliveryConnection::new();
        d.on_cmd_move_item().unwrap();
        d.send_move().unwrap();
        d.move_write_done().unwrap();
        assert!(d.finish_write().is_err());
        d.on_move_done().unwrap();
        d.finish_write().unwrap();
        assert_eq!(d.state(), DeliveryState::Idle);
    }
}
