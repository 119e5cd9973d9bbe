//! Host-to-device command frames
//!
//! ```text
//!   0     1      2       3..7            7
//!   0xBB  type   target  session id LE   xor
//! ```
//!
//! Target `0` addresses every device behind the coordinator.

use serde::{Deserialize, Serialize};

use super::binary::checksum;

/// Header byte of every host-to-device frame.
pub const COMMAND_HEADER: u8 = 0xBB;

/// Fixed size of a command frame.
pub const COMMAND_LEN: usize = 8;

/// Target address meaning "all devices".
pub const BROADCAST: u8 = 0;

/// Command discriminants understood by the coordinator firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    Arm = 1,
    Disarm = 2,
    Test = 3,
    StatusRequest = 4,
    CorrectAnswerFeedback = 5,
    WrongAnswerFeedback = 6,
    EndRound = 7,
}

impl CommandType {
    /// Map a wire byte back to a command type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => CommandType::Arm,
            2 => CommandType::Disarm,
            3 => CommandType::Test,
            4 => CommandType::StatusRequest,
            5 => CommandType::CorrectAnswerFeedback,
            6 => CommandType::WrongAnswerFeedback,
            7 => CommandType::EndRound,
            _ => return None,
        })
    }
}

/// One outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandType,
    /// Device address, or [`BROADCAST`]
    pub target: u8,
    pub session_id: u32,
}

impl Command {
    /// Command for every device.
    pub fn broadcast(kind: CommandType, session_id: u32) -> Self {
        Self { kind, target: BROADCAST, session_id }
    }

    /// Command for a single device address.
    pub fn to_device(kind: CommandType, target: u8, session_id: u32) -> Self {
        Self { kind, target, session_id }
    }

    /// Whether this command addresses every device.
    pub fn is_broadcast(&self) -> bool {
        self.target == BROADCAST
    }

    /// Wire representation.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut out = [0u8; COMMAND_LEN];
        out[0] = COMMAND_HEADER;
        out[1] = self.kind as u8;
        out[2] = self.target;
        out[3..7].copy_from_slice(&self.session_id.to_le_bytes());
        out[7] = checksum(&out[..7]);
        out
    }

    /// Parse a command frame from the front of `bytes`.
    ///
    /// Used by the simulated coordinator; returns `None` for anything that is not a
    /// complete, valid command.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let frame = bytes.get(..COMMAND_LEN)?;
        if frame[0] != COMMAND_HEADER || checksum(&frame[..7]) != frame[7] {
            return None;
        }
        let kind = CommandType::from_byte(frame[1])?;
        let session_id = u32::from_le_bytes([frame[3], frame[4], frame[5], frame[6]]);
        Some(Self { kind, target: frame[2], session_id })
    }
}
