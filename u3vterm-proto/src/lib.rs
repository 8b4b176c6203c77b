//! U3VCP (USB3 Vision Control Protocol) wire framing.
//!
//! Every frame is a fixed 12-byte little-endian header followed by a
//! command-specific payload. The host sends read/write-memory commands and
//! receives acknowledgements; the device may defer with a pending ack or
//! interleave unsolicited event frames.
//!
//! This crate only encodes and decodes bytes; it performs no I/O.

mod codec;
mod frame;

pub use codec::{
    Ack, HostCommand, encode_pending_ack, encode_read_mem, encode_read_mem_ack, encode_write_mem,
    encode_write_mem_ack, parse_ack, parse_command,
};
pub use frame::{
    Command, FLAG_REQUEST_ACK, FrameError, HEADER_LEN, Header, MAGIC, MAX_MSG_LEN, MAX_WRITE_DATA,
};
