//! File-transfer sub-protocol: path staging, open/close handshake, data pump.
//!
//! The file engine shares the session's transport but lives on a disjoint
//! register bank: a command/status/result triple, a staged path, and a
//! small data window polled for availability.

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};
use crate::map::{self, FileCmd, file_status};
use crate::session::Session;
use crate::transport::BulkChannel;

/// How long an open command may take before timing out.
const OPEN_DEADLINE: Duration = Duration::from_millis(500);
/// Poll interval for file status and data availability.
const FILE_POLL: Duration = Duration::from_millis(10);
/// Settle time between the close command and the final error check.
const CLOSE_SETTLE: Duration = Duration::from_millis(5);

/// Byte counts handed to a transfer progress callback.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Bytes moved so far.
    pub transferred: u64,
    /// Total size, when the device or the local file reports one.
    pub total: Option<u64>,
}

impl<C: BulkChannel> Session<C> {
    /// Downloads `remote` into `sink`, reporting progress along the way.
    ///
    /// Returns the number of bytes received. The file channel is closed on
    /// every path; a close failure downgrades a finished transfer.
    pub fn download(
        &mut self,
        remote: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<u64> {
        self.ensure_session()?;
        self.stage_path(remote)?;
        debug!("open read '{remote}'");
        self.file_cmd(FileCmd::OpenRead)?;
        if let Err(e) = self.wait_file_open(file_status::READING) {
            let _ = self.close_file_channel();
            return Err(e);
        }
        // 0 means the device does not know the size; that is not an error.
        let total = self
            .transport()
            .read_u64(map::REG_FILE_SIZE_LOW)
            .unwrap_or(0);
        let total = (total != 0).then_some(total);

        let pumped = self.pump_download(sink, total, progress);
        let closed = self.close_file_channel();
        let received = pumped?;
        closed?;
        Ok(received)
    }

    /// Uploads `source` (of known `len`, or `None` when streaming) to
    /// `remote`. Returns the number of bytes sent.
    pub fn upload(
        &mut self,
        source: &mut dyn Read,
        len: Option<u64>,
        remote: &str,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<u64> {
        self.ensure_session()?;
        self.stage_path(remote)?;
        debug!("open write '{remote}'");
        self.file_cmd(FileCmd::OpenWrite)?;
        if let Err(e) = self.wait_file_open(file_status::WRITING) {
            let _ = self.close_file_channel();
            return Err(e);
        }

        let pumped = self.pump_upload(source, len, progress);
        let closed = self.close_file_channel();
        let sent = pumped?;
        closed?;
        Ok(sent)
    }

    fn pump_download(
        &mut self,
        sink: &mut dyn Write,
        total: Option<u64>,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<u64> {
        let mut received = 0u64;
        loop {
            let avail = self.transport().read_u32(map::REG_FILE_DATA_AVAIL)?;
            if avail == 0 {
                let st = self.transport().read_u32(map::REG_FILE_STATUS)?;
                if st & file_status::ERROR != 0 {
                    return Err(self.file_errno("u3vget"));
                }
                if st & file_status::EOF != 0 {
                    break;
                }
                thread::sleep(FILE_POLL);
                continue;
            }
            let take = (avail as usize).min(map::FILE_DATA_WINDOW) as u16;
            let chunk = self.transport().read_memory(map::REG_FILE_DATA, take)?;
            sink.write_all(&chunk).map_err(Error::Local)?;
            received += chunk.len() as u64;
            progress(Progress {
                transferred: received,
                total,
            });
        }
        Ok(received)
    }

    fn pump_upload(
        &mut self,
        source: &mut dyn Read,
        total: Option<u64>,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<u64> {
        let mut buf = [0u8; map::FILE_DATA_WINDOW];
        let mut sent = 0u64;
        loop {
            let got = source.read(&mut buf).map_err(Error::Local)?;
            if got == 0 {
                break;
            }
            self.transport()
                .write_memory(map::REG_FILE_DATA, &buf[..got])?;
            let st = self.transport().read_u32(map::REG_FILE_STATUS)?;
            if st & file_status::ERROR != 0 {
                return Err(self.file_errno("u3vput"));
            }
            sent += got as u64;
            progress(Progress {
                transferred: sent,
                total,
            });
        }
        Ok(sent)
    }

    /// Stages the remote path: resets the channel, then writes the path
    /// NUL-padded to the register's full capacity.
    fn stage_path(&mut self, remote: &str) -> Result<()> {
        if remote.is_empty() {
            return Err(Error::PathRequired);
        }
        if remote.len() >= map::FILE_PATH_CAPACITY {
            return Err(Error::PathTooLong {
                len: remote.len(),
                max: map::FILE_PATH_CAPACITY - 1,
            });
        }
        self.file_cmd(FileCmd::Reset)?;
        let mut buf = [0u8; map::FILE_PATH_CAPACITY];
        buf[..remote.len()].copy_from_slice(remote.as_bytes());
        self.transport().write_memory(map::REG_FILE_PATH, &buf)
    }

    fn file_cmd(&mut self, cmd: FileCmd) -> Result<()> {
        self.transport().write_u32(map::REG_FILE_CMD, cmd as u32)
    }

    fn wait_file_open(&mut self, mode_bit: u32) -> Result<()> {
        let deadline = Instant::now() + OPEN_DEADLINE;
        while Instant::now() < deadline {
            let st = self.transport().read_u32(map::REG_FILE_STATUS)?;
            if st & mode_bit != 0 {
                return Ok(());
            }
            if st & file_status::ERROR != 0 {
                return Err(self.file_errno("open file"));
            }
            thread::sleep(FILE_POLL);
        }
        Err(Error::FileOpenTimeout)
    }

    /// Issues a close and surfaces any error the device staged meanwhile.
    fn close_file_channel(&mut self) -> Result<()> {
        self.file_cmd(FileCmd::Close)?;
        thread::sleep(CLOSE_SETTLE);
        self.check_file_error("file transfer")
    }

    /// Succeeds unless the ERROR bit is set; a stale non-zero result code
    /// without the bit is ignored.
    fn check_file_error(&mut self, context: &'static str) -> Result<()> {
        let st = self.transport().read_u32(map::REG_FILE_STATUS)?;
        if st & file_status::ERROR == 0 {
            return Ok(());
        }
        Err(self.file_errno(context))
    }

    /// Builds the error for an operation whose ERROR bit is already set.
    fn file_errno(&mut self, context: &'static str) -> Error {
        match self.transport().read_u32(map::REG_FILE_RESULT) {
            Ok(errno) => Error::File {
                context,
                errno: errno as i32,
            },
            Err(e) => e,
        }
    }
}
