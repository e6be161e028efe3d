//! Legacy (v2) wire encoding: commands and acks carried as JSON over the
//! frame content, for compatibility with older capture helpers that never
//! learned the compact v3 sub-record layout.

use super::{Ack, Command, WireError};

pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(cmd).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_command(content: &[u8]) -> Result<Command, WireError> {
    serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn encode_ack(ack: &Ack) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(ack).map_err(|e| WireError::Decode(e.to_string()))
}

pub fn decode_ack(content: &[u8]) -> Result<Ack, WireError> {
    serde_json::from_slice(content).map_err(|e| WireError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CommandKind;

    #[test]
    fn command_round_trips_through_json() {
        let cmd = Command { seqno: 7, kind: CommandKind::Ping };
        let bytes = encode_command(&cmd).unwrap();
        let back = decode_command(&bytes).unwrap();
        assert_eq!(back.seqno, 7);
        assert!(matches!(back.kind, CommandKind::Ping));
    }
}
