//! Terminal session state machine: probe, auth, start, drain, lock.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::map::{self, ctrl, status};
use crate::transport::{BulkChannel, Transport};

/// Idle window after the last output byte before a drain returns.
pub const DRAIN_IDLE: Duration = Duration::from_millis(200);
/// Longest a single drain call will run.
pub const DRAIN_MAX: Duration = Duration::from_secs(5);

/// How long session start may take before timing out.
const SESSION_DEADLINE: Duration = Duration::from_secs(2);
/// Poll interval while waiting for the READY bit.
const SESSION_POLL: Duration = Duration::from_millis(50);
/// Sleep between empty output polls inside a drain.
const DRAIN_POLL: Duration = Duration::from_millis(50);
/// Settle time after a reset control write.
const RESET_SETTLE: Duration = Duration::from_millis(200);

/// An authenticated terminal session over one bulk channel.
///
/// Sessions start closed; [`ensure_session`](Session::ensure_session) walks
/// probe → auth → start on demand and is idempotent. Dropping a session
/// locks the device again, whatever state it was left in.
pub struct Session<C: BulkChannel> {
    transport: Transport<C>,
    initialized: bool,
    version: u32,
    chunk_hint: u32,
    password: Option<String>,
    echo: bool,
    locked: bool,
}

impl<C: BulkChannel> Session<C> {
    /// Creates a closed session over `chan`.
    pub fn new(chan: C) -> Self {
        Self {
            transport: Transport::new(chan),
            initialized: false,
            version: 0,
            chunk_hint: map::DEFAULT_CHUNK,
            password: None,
            echo: true,
            locked: false,
        }
    }

    /// Sets the password used when the terminal is locked.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Chooses whether the device echoes TTY input back.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Firmware protocol version; valid after [`initialize`](Self::initialize).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Negotiated TTY chunk size.
    pub fn chunk_hint(&self) -> u32 {
        self.chunk_hint
    }

    /// Probes the terminal bank: magic check, version, chunk hint.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let regs = self.transport.read_regs(map::REG_MAGIC, 2)?;
        if regs[0] != map::TERMINAL_MAGIC {
            return Err(Error::BadTerminalMagic {
                got: regs[0],
                want: map::TERMINAL_MAGIC,
            });
        }
        self.version = regs[1];
        // An explicit version register overrides the probe word when set.
        if let Ok(ver) = self.transport.read_u32(map::REG_VERSION) {
            if ver != 0 {
                self.version = ver;
            }
        }
        let hint = self.transport.read_u32(map::REG_CHUNK_HINT).unwrap_or(0);
        self.chunk_hint = match hint {
            0 => map::DEFAULT_CHUNK,
            h => h.min(u3vterm_proto::MAX_WRITE_DATA as u32),
        };
        debug!(
            "terminal probe ok: version=0x{:08x} chunk_hint={}",
            self.version, self.chunk_hint
        );
        self.initialized = true;
        Ok(())
    }

    /// Makes sure the terminal is unlocked, authenticating if needed.
    pub fn ensure_auth(&mut self) -> Result<()> {
        if self.transport.read_u32(map::REG_AUTH_STATUS)? != 0 {
            return Ok(());
        }
        let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) else {
            return Err(Error::AuthRequired);
        };
        self.transport
            .write_memory(map::REG_AUTH_BUF, password.as_bytes())?;
        self.transport.write_u32(map::REG_AUTH_CMD, 1)?;
        if self.transport.read_u32(map::REG_AUTH_STATUS)? == 0 {
            return Err(Error::AuthFailed);
        }
        Ok(())
    }

    /// Brings the session to the ready state, starting it if necessary.
    pub fn ensure_session(&mut self) -> Result<()> {
        self.initialize()?;
        self.ensure_auth()?;
        if self.transport.read_u32(map::REG_STATUS)? & status::READY != 0 {
            return Ok(());
        }
        self.write_control(ctrl::START)?;
        self.await_ready()
    }

    /// Resets the remote terminal, then waits for it to come back ready.
    ///
    /// Authentication survives a reset.
    pub fn reset(&mut self) -> Result<()> {
        self.initialize()?;
        self.write_control(ctrl::RESET)?;
        thread::sleep(RESET_SETTLE);
        self.ensure_session()
    }

    /// Locks the terminal. Safe to call more than once.
    pub fn lock(&mut self) -> Result<()> {
        self.transport.write_u32(map::REG_AUTH_CMD, 0)?;
        self.locked = true;
        Ok(())
    }

    /// Sends one command line, newline-terminated, to the remote shell.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.ensure_session()?;
        let mut payload = command.as_bytes().to_vec();
        if payload.last() != Some(&b'\n') {
            payload.push(b'\n');
        }
        self.write_tty(&payload)
    }

    /// Writes raw bytes to the TTY window in chunk-hint slices.
    pub fn write_tty(&mut self, bytes: &[u8]) -> Result<()> {
        let chunk = self.chunk_hint as usize;
        for slice in bytes.chunks(chunk) {
            self.transport.write_memory(map::REG_TTY_DATA, slice)?;
        }
        Ok(())
    }

    /// Collects buffered remote output.
    ///
    /// Returns once no new bytes have arrived for `idle`, or when `max_wait`
    /// elapses, with whatever was read so far. An overflow is warned once
    /// per call; a set error bit is reported but does not stop the drain.
    pub fn drain_output(&mut self, idle: Duration, max_wait: Duration) -> Result<Vec<u8>> {
        self.ensure_session()?;
        let mut out = Vec::new();
        let deadline = Instant::now() + max_wait;
        let mut last_data = Instant::now();
        let mut warned_overflow = false;
        let mut warned_error = false;

        while Instant::now() < deadline {
            let st = self.transport.read_u32(map::REG_STATUS)?;
            if st & status::OVERFLOW != 0 && !warned_overflow {
                warn!("terminal output overflowed, some bytes were dropped");
                warned_overflow = true;
            }
            if st & status::ERROR != 0 && !warned_error {
                warn!("terminal status reports an error bit");
                warned_error = true;
            }

            let available = self.transport.read_u32(map::REG_OUTPUT_AVAIL)?;
            if available == 0 {
                if last_data.elapsed() > idle {
                    break;
                }
                thread::sleep(DRAIN_POLL);
                continue;
            }

            let take = available.min(self.chunk_hint);
            let chunk = self.transport.read_memory(map::REG_TTY_DATA, take as u16)?;
            out.extend_from_slice(&chunk);
            last_data = Instant::now();
        }
        Ok(out)
    }

    /// Access for register-level sub-protocols sharing this session.
    pub(crate) fn transport(&mut self) -> &mut Transport<C> {
        &mut self.transport
    }

    fn write_control(&mut self, op: u32) -> Result<()> {
        let echo_bit = if self.echo {
            ctrl::ECHO_ENABLE
        } else {
            ctrl::ECHO_DISABLE
        };
        self.transport
            .write_u32(map::REG_STATUS, op | ctrl::CLEAR_FLAGS | echo_bit)
    }

    fn await_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + SESSION_DEADLINE;
        while Instant::now() < deadline {
            if self.transport.read_u32(map::REG_STATUS)? & status::READY != 0 {
                return Ok(());
            }
            thread::sleep(SESSION_POLL);
        }
        Err(Error::SessionTimeout)
    }
}

impl<C: BulkChannel> Drop for Session<C> {
    /// Best-effort lock so no exit path leaves the terminal unlocked.
    fn drop(&mut self) {
        if !self.locked {
            let _ = self.transport.write_u32(map::REG_AUTH_CMD, 0);
        }
    }
}
