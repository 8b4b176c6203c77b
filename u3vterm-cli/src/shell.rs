//! Interactive shells: raw byte mode and the line-buffered fallback.

use std::io::{self, Write as _};
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios,
};
use u3vterm::{BulkChannel, Session};

use crate::transfer;

/// Ctrl+], ends a raw-mode session immediately without forwarding.
const EXIT_KEY: u8 = 0x1d;
/// Idle window for the warmup drain right after session start.
const WARMUP_IDLE: Duration = Duration::from_millis(50);
/// Longest the warmup drain may run.
const WARMUP_MAX: Duration = Duration::from_millis(500);
/// Cadence of device output polls in the raw-mode loop.
const OUTPUT_POLL: Duration = Duration::from_millis(10);
/// Stdin poll timeout per loop iteration (milliseconds).
const INPUT_POLL_MS: u8 = 20;

/// Byte-stream shell for firmware with raw TTY support.
///
/// Stdin bytes are forwarded as typed; device output is copied to stdout as
/// it arrives. A local line buffer intercepts `exit` and the transfer
/// meta-commands so they never reach the remote shell.
pub fn run_raw_mode<C: BulkChannel>(session: &mut Session<C>) -> Result<()> {
    session.ensure_session()?;
    banner(session);
    preamble(session)?;

    // Raw mode is restored by the guard on every exit path below.
    let _guard = RawModeGuard::enable()?;
    let stdin = io::stdin();
    let mut in_buf = [0u8; 256];
    let mut current_line = String::new();
    let mut last_poll = Instant::now();

    loop {
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(INPUT_POLL_MS)).context("poll stdin")?;
        let mut n = 0;
        if ready > 0 {
            n = nix::unistd::read(stdin.as_raw_fd(), &mut in_buf).context("read stdin")?;
            if n == 0 {
                // stdin closed underneath us
                break;
            }
        }

        let mut exit_requested = false;
        if n > 0 {
            let mut to_send = Vec::with_capacity(n);
            for &byte in &in_buf[..n] {
                match byte {
                    EXIT_KEY => exit_requested = true,
                    b'\r' | b'\n' => {
                        if current_line == "exit" {
                            // Erase the typed word remotely, commit a blank line.
                            to_send.extend_from_slice(b"\x08\x08\x08\x08\n");
                            session.write_tty(&to_send)?;
                            to_send.clear();
                            current_line.clear();
                            exit_requested = true;
                            continue;
                        }
                        if transfer::is_meta(&current_line) {
                            to_send.extend(std::iter::repeat_n(b'\x08', current_line.len()));
                            to_send.push(b'\n');
                            session.write_tty(&to_send)?;
                            to_send.clear();
                            println!();
                            let line = std::mem::take(&mut current_line);
                            run_meta(session, &line);
                            continue;
                        }
                        current_line.clear();
                        to_send.push(byte);
                    }
                    0x7f | 0x08 => {
                        current_line.pop();
                        to_send.push(byte);
                    }
                    b if b.is_ascii_graphic() || b == b' ' => {
                        current_line.push(b as char);
                        to_send.push(b);
                    }
                    other => to_send.push(other),
                }
            }
            if !to_send.is_empty() {
                session.write_tty(&to_send)?;
            }
        }
        if exit_requested {
            break;
        }

        if last_poll.elapsed() >= OUTPUT_POLL {
            let out = session.drain_output(Duration::from_millis(10), Duration::from_millis(10))?;
            print_bytes(&out)?;
            last_poll = Instant::now();
        }
    }
    Ok(())
}

/// Line-buffered shell for firmware without raw TTY support.
pub fn run_line_mode<C: BulkChannel>(session: &mut Session<C>) -> Result<()> {
    session.ensure_session()?;
    banner(session);
    preamble(session)?;

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        if transfer::is_meta(trimmed) {
            run_meta(session, trimmed);
            // Blank keep-alive so the remote prompt redraws.
            session.send_command(" ")?;
        } else {
            session.send_command(trimmed)?;
        }
        let out = session.drain_output(u3vterm::DRAIN_IDLE, u3vterm::DRAIN_MAX)?;
        print_bytes(&out)?;
    }
    Ok(())
}

fn banner<C: BulkChannel>(session: &Session<C>) {
    println!(
        "Interactive shell ready (firmware version 0x{:x}). Type 'exit' to quit.",
        session.version()
    );
}

/// Drains warmup output and moves the remote shell to its home directory.
fn preamble<C: BulkChannel>(session: &mut Session<C>) -> Result<()> {
    let warmup = session.drain_output(WARMUP_IDLE, WARMUP_MAX)?;
    print_bytes(&warmup)?;
    session.send_command("cd /root")?;
    let out = session.drain_output(u3vterm::DRAIN_IDLE, u3vterm::DRAIN_MAX)?;
    print_bytes(&out)?;
    Ok(())
}

/// Runs a transfer meta-command, reporting failures without ending the shell.
fn run_meta<C: BulkChannel>(session: &mut Session<C>, line: &str) {
    match transfer::parse_meta(line) {
        Ok(Some(meta)) => {
            if let Err(e) = transfer::execute(session, &meta) {
                eprintln!("{e:#}");
            }
        }
        Ok(None) => {}
        Err(usage) => eprintln!("{usage}"),
    }
}

fn print_bytes(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}

/// Restores the saved termios state when dropped.
struct RawModeGuard {
    saved: Termios,
}

impl RawModeGuard {
    /// Switches stdin to raw mode: no canonical editing, no local echo, no
    /// signal keys, no XON/XOFF, no CR-to-NL translation.
    fn enable() -> Result<RawModeGuard> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(stdin.as_fd()).context("tcgetattr")?;
        let mut raw = saved.clone();
        raw.local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.input_flags.remove(InputFlags::IXON | InputFlags::ICRNL);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).context("tcsetattr")?;
        Ok(RawModeGuard { saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &self.saved);
    }
}
