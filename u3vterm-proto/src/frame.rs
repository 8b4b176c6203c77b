//! Header layout, command codes, and size limits.

use thiserror::Error;

/// Protocol magic, "U3VC" when read as little-endian bytes.
pub const MAGIC: u32 = 0x4356_3355;

/// Header flag bit 14: the sender requests an acknowledgement.
pub const FLAG_REQUEST_ACK: u16 = 1 << 14;

/// Fixed header length preceding every payload.
pub const HEADER_LEN: usize = 12;

/// Upper bound on a whole frame, header included.
pub const MAX_MSG_LEN: usize = 65536;

/// Largest data slice a single write-memory command can carry
/// (frame bound minus header and address field).
pub const MAX_WRITE_DATA: usize = MAX_MSG_LEN - HEADER_LEN - 8;

/// U3VCP command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    ReadMemCmd = 0x0800,
    ReadMemAck = 0x0801,
    WriteMemCmd = 0x0802,
    WriteMemAck = 0x0803,
    PendingAck = 0x0805,
    EventCmd = 0x0C00,
    EventAck = 0x0C01,
}

impl Command {
    /// Maps a wire code to a known command.
    pub fn from_wire(raw: u16) -> Option<Command> {
        Some(match raw {
            0x0800 => Command::ReadMemCmd,
            0x0801 => Command::ReadMemAck,
            0x0802 => Command::WriteMemCmd,
            0x0803 => Command::WriteMemAck,
            0x0805 => Command::PendingAck,
            0x0C00 => Command::EventCmd,
            0x0C01 => Command::EventAck,
            _ => return None,
        })
    }
}

/// Decoded frame header.
///
/// `command` stays raw so unrecognized codes can still be reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u16,
    pub command: u16,
    pub payload_len: u16,
    pub id: u16,
}

impl Header {
    /// Parses and validates the fixed prefix of `frame`.
    pub fn parse(frame: &[u8]) -> Result<Header, FrameError> {
        if frame.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                need: HEADER_LEN,
                got: frame.len(),
            });
        }
        // unwrap: slice bounds are checked above
        let magic = u32::from_le_bytes(frame[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(FrameError::BadMagic { got: magic });
        }
        Ok(Header {
            flags: u16::from_le_bytes(frame[4..6].try_into().unwrap()),
            command: u16::from_le_bytes(frame[6..8].try_into().unwrap()),
            payload_len: u16::from_le_bytes(frame[8..10].try_into().unwrap()),
            id: u16::from_le_bytes(frame[10..12].try_into().unwrap()),
        })
    }
}

/// Frame-shape errors raised while encoding or parsing U3VCP frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does.
    #[error("frame truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    /// The frame does not start with the U3VCP magic.
    #[error("bad frame magic 0x{got:08x}")]
    BadMagic { got: u32 },

    /// A payload is too small for its command's fixed fields.
    #[error("payload too short for command 0x{command:04x}: need {need} bytes, got {got}")]
    ShortPayload { command: u16, need: usize, got: usize },

    /// A payload would not fit a single frame.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    Oversized { len: usize, max: usize },

    /// A command code this protocol does not define.
    #[error("unrecognized command code 0x{got:04x}")]
    UnknownCommand { got: u16 },
}
