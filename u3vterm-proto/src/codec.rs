//! Encoders and decoders for U3VCP frames.
//!
//! Buffers are assembled with field-by-field little-endian writes; no
//! struct overlay, no alignment or padding traps.

use crate::frame::{
    Command, FLAG_REQUEST_ACK, FrameError, HEADER_LEN, Header, MAGIC, MAX_MSG_LEN, MAX_WRITE_DATA,
};

/// A host-to-device command, decoded. Device-side code (and test doubles)
/// use this to service frames the host sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand<'a> {
    /// Read `size` bytes of device memory at `address`.
    ReadMem { address: u64, size: u16 },
    /// Write `data` to device memory at `address`.
    WriteMem { address: u64, data: &'a [u8] },
}

/// A device-to-host frame, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack<'a> {
    /// Read-memory ack carrying the requested bytes.
    ReadMem { data: &'a [u8] },
    /// Write-memory ack reporting how many bytes the device accepted.
    WriteMem { bytes_written: u16 },
    /// The device is still working; poll again after `timeout_ms`.
    Pending { timeout_ms: u16 },
    /// Unsolicited event frame; carries a device-chosen id.
    Event,
    /// Any other command code; fatal for the transaction in flight.
    Other { command: u16 },
}

fn put_header(buf: &mut Vec<u8>, flags: u16, command: Command, payload_len: u16, id: u16) {
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&(command as u16).to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
}

/// Encodes a read-memory command for `size` bytes at `address`.
pub fn encode_read_mem(id: u16, address: u64, size: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 12);
    put_header(&mut buf, FLAG_REQUEST_ACK, Command::ReadMemCmd, 12, id);
    buf.extend_from_slice(&address.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Encodes a write-memory command carrying `data`.
pub fn encode_write_mem(id: u16, address: u64, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    if data.len() > MAX_WRITE_DATA {
        return Err(FrameError::Oversized {
            len: data.len(),
            max: MAX_WRITE_DATA,
        });
    }
    let payload_len = (8 + data.len()) as u16;
    let mut buf = Vec::with_capacity(HEADER_LEN + 8 + data.len());
    put_header(&mut buf, FLAG_REQUEST_ACK, Command::WriteMemCmd, payload_len, id);
    buf.extend_from_slice(&address.to_le_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Encodes a read-memory acknowledgement carrying `data`.
pub fn encode_read_mem_ack(id: u16, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    if data.len() > MAX_MSG_LEN - HEADER_LEN {
        return Err(FrameError::Oversized {
            len: data.len(),
            max: MAX_MSG_LEN - HEADER_LEN,
        });
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
    put_header(&mut buf, 0, Command::ReadMemAck, data.len() as u16, id);
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Encodes a write-memory acknowledgement.
pub fn encode_write_mem_ack(id: u16, bytes_written: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 4);
    put_header(&mut buf, 0, Command::WriteMemAck, 4, id);
    buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
    buf.extend_from_slice(&bytes_written.to_le_bytes());
    buf
}

/// Encodes a pending acknowledgement deferring the real one by `timeout_ms`.
pub fn encode_pending_ack(id: u16, timeout_ms: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + 4);
    put_header(&mut buf, 0, Command::PendingAck, 4, id);
    buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
    buf.extend_from_slice(&timeout_ms.to_le_bytes());
    buf
}

/// Validates the header and bounds-checks the payload against it.
fn payload_of<'a>(frame: &'a [u8], header: &Header) -> Result<&'a [u8], FrameError> {
    let end = HEADER_LEN + usize::from(header.payload_len);
    if frame.len() < end {
        return Err(FrameError::Truncated {
            need: end,
            got: frame.len(),
        });
    }
    Ok(&frame[HEADER_LEN..end])
}

/// Parses a device-to-host frame, returning its id and decoded body.
pub fn parse_ack(frame: &[u8]) -> Result<(u16, Ack<'_>), FrameError> {
    let header = Header::parse(frame)?;
    let payload = payload_of(frame, &header)?;
    let fixed = |need: usize| -> Result<(), FrameError> {
        if payload.len() < need {
            return Err(FrameError::ShortPayload {
                command: header.command,
                need,
                got: payload.len(),
            });
        }
        Ok(())
    };
    let ack = match Command::from_wire(header.command) {
        Some(Command::ReadMemAck) => Ack::ReadMem { data: payload },
        Some(Command::WriteMemAck) => {
            fixed(4)?;
            Ack::WriteMem {
                // unwrap: length checked above
                bytes_written: u16::from_le_bytes(payload[2..4].try_into().unwrap()),
            }
        }
        Some(Command::PendingAck) => {
            fixed(4)?;
            Ack::Pending {
                timeout_ms: u16::from_le_bytes(payload[2..4].try_into().unwrap()),
            }
        }
        Some(Command::EventCmd) => Ack::Event,
        _ => Ack::Other {
            command: header.command,
        },
    };
    Ok((header.id, ack))
}

/// Parses a host-to-device frame. The counterpart of [`parse_ack`] for
/// device-side servicing.
pub fn parse_command(frame: &[u8]) -> Result<(Header, HostCommand<'_>), FrameError> {
    let header = Header::parse(frame)?;
    let payload = payload_of(frame, &header)?;
    match Command::from_wire(header.command) {
        Some(Command::ReadMemCmd) => {
            if payload.len() < 12 {
                return Err(FrameError::ShortPayload {
                    command: header.command,
                    need: 12,
                    got: payload.len(),
                });
            }
            // unwrap: lengths checked above
            let address = u64::from_le_bytes(payload[0..8].try_into().unwrap());
            let size = u16::from_le_bytes(payload[10..12].try_into().unwrap());
            Ok((header, HostCommand::ReadMem { address, size }))
        }
        Some(Command::WriteMemCmd) => {
            if payload.len() < 8 {
                return Err(FrameError::ShortPayload {
                    command: header.command,
                    need: 8,
                    got: payload.len(),
                });
            }
            let address = u64::from_le_bytes(payload[0..8].try_into().unwrap());
            Ok((
                header,
                HostCommand::WriteMem {
                    address,
                    data: &payload[8..],
                },
            ))
        }
        _ => Err(FrameError::UnknownCommand {
            got: header.command,
        }),
    }
}
