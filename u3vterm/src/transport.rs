//! U3VCP request/response engine over a bulk channel.
//!
//! One transaction at a time: a command goes out, then the engine blocks on
//! the IN side until the matching acknowledgement (or an error) arrives.
//! Pending acks defer the reply; unsolicited event frames are skipped.

use std::io;
use std::thread;
use std::time::Duration;

use log::trace;
use u3vterm_proto::{self as proto, Ack, Command, MAX_MSG_LEN};

use crate::error::{Error, Result};

/// Most pending acks tolerated within one transaction.
const MAX_PENDING_ACKS: u32 = 5;

/// A full-duplex bulk byte pipe with a bounded message size.
///
/// Implemented by [`UsbChannel`](crate::UsbChannel) for real hardware and by
/// in-memory doubles in tests.
pub trait BulkChannel {
    /// Sends one complete message.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
    /// Receives one complete message into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Completed transaction result, internal to the engine.
enum Reply {
    Read(Vec<u8>),
    Write { bytes_written: u16 },
}

/// Framing engine owning the request-id counter and receive scratch buffer.
pub struct Transport<C> {
    chan: C,
    next_id: u16,
    rx: Vec<u8>,
}

impl<C: BulkChannel> Transport<C> {
    /// Wraps a bulk channel.
    pub fn new(chan: C) -> Self {
        Self {
            chan,
            next_id: 0,
            rx: vec![0; MAX_MSG_LEN],
        }
    }

    /// Reads `size` bytes of device memory at `address`.
    ///
    /// A zero-length read returns an empty buffer without touching the bus.
    pub fn read_memory(&mut self, address: u32, size: u16) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let id = self.bump_id();
        let frame = proto::encode_read_mem(id, u64::from(address), size);
        trace!("read_memory id={id} addr=0x{address:08x} size={size}");
        match self.transact(&frame, id)? {
            Reply::Read(data) => {
                if data.len() != usize::from(size) {
                    return Err(Error::SizeMismatch {
                        got: data.len() as u16,
                        want: size,
                    });
                }
                Ok(data)
            }
            Reply::Write { .. } => Err(Error::UnexpectedCommand {
                got: Command::WriteMemAck as u16,
            }),
        }
    }

    /// Writes `data` to device memory at `address`.
    ///
    /// An empty write completes without touching the bus.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let id = self.bump_id();
        let frame = proto::encode_write_mem(id, u64::from(address), data)?;
        trace!("write_memory id={id} addr=0x{address:08x} len={}", data.len());
        match self.transact(&frame, id)? {
            Reply::Write { bytes_written } => {
                if usize::from(bytes_written) != data.len() {
                    return Err(Error::SizeMismatch {
                        got: bytes_written,
                        want: data.len() as u16,
                    });
                }
                Ok(())
            }
            Reply::Read(_) => Err(Error::UnexpectedCommand {
                got: Command::ReadMemAck as u16,
            }),
        }
    }

    /// Sends `frame` and waits for the ack pairing with `id`.
    fn transact(&mut self, frame: &[u8], id: u16) -> Result<Reply> {
        self.chan.send(frame).map_err(Error::Bulk)?;
        let mut pendings = 0u32;
        loop {
            let n = self.chan.receive(&mut self.rx).map_err(Error::Bulk)?;
            let (ack_id, ack) = proto::parse_ack(&self.rx[..n])?;
            if !matches!(ack, Ack::Event) && ack_id != id {
                return Err(Error::IdMismatch {
                    got: ack_id,
                    want: id,
                });
            }
            match ack {
                // Unsolicited event traffic never consumes the pairing.
                Ack::Event => {
                    trace!("ignoring event frame id={ack_id}");
                }
                Ack::Pending { timeout_ms } => {
                    pendings += 1;
                    if pendings > MAX_PENDING_ACKS {
                        return Err(Error::TooManyPending);
                    }
                    trace!("pending ack id={id}, waiting {timeout_ms} ms");
                    thread::sleep(Duration::from_millis(u64::from(timeout_ms.max(1))));
                }
                Ack::ReadMem { data } => return Ok(Reply::Read(data.to_vec())),
                Ack::WriteMem { bytes_written } => return Ok(Reply::Write { bytes_written }),
                Ack::Other { command } => {
                    return Err(Error::UnexpectedCommand { got: command });
                }
            }
        }
    }

    fn bump_id(&mut self) -> u16 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    /// Test access to the underlying channel.
    #[cfg(test)]
    pub(crate) fn channel(&self) -> &C {
        &self.chan
    }
}
