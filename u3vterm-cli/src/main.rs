//! CLI for the u3vterm USB3 Vision terminal client.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod shell;
mod transfer;

use std::io::Write as _;

use anyhow::{Context as _, Result};
use clap::Parser;
use u3vterm::{BulkChannel, DeviceInfo, Session, UsbChannel, map};

#[derive(Parser)]
#[command(
    name = "u3vterm",
    version,
    about = "Interactive shell and file transfer over a USB3 Vision terminal device"
)]
struct Cli {
    /// Execute a single command then exit.
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Force interactive mode: 1 = line mode, 2 = raw byte mode.
    #[arg(
        short = 'i',
        long,
        value_name = "MODE",
        conflicts_with_all = ["command", "get", "put", "rest"]
    )]
    interactive: Option<u16>,

    /// Download a remote file then exit.
    #[arg(long, num_args = 2, value_names = ["REMOTE", "LOCAL"], conflicts_with = "command")]
    get: Option<Vec<String>>,

    /// Upload a local file then exit.
    #[arg(long, num_args = 2, value_names = ["LOCAL", "REMOTE"], conflicts_with_all = ["command", "get"])]
    put: Option<Vec<String>>,

    /// Reset the terminal session before use.
    #[arg(short = 'r', long)]
    reset: bool,

    /// Password for unlocking the terminal.
    #[arg(short = 'p', long, env = "TY_TERM_PASS", hide_env_values = true)]
    password: Option<String>,

    /// Match the device by USB serial number (iSerial).
    #[arg(long = "id", value_name = "SERIAL")]
    serial: Option<String>,

    /// USB vendor ID (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16, default_value = "0x04b4")]
    vid: u16,

    /// USB product ID (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16, default_value = "0x1003")]
    pid: u16,

    /// Command words; joined with spaces and executed once.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        conflicts_with_all = ["command", "get", "put"]
    )]
    rest: Vec<String>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("u3vterm: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.single_command();
    let interactive = command.is_none();
    let mut mode = cli.interactive.unwrap_or(2);

    let chan = UsbChannel::open(cli.vid, cli.pid, cli.serial.as_deref(), choose_device)
        .context("unable to open device")?;

    let mut session = Session::new(chan);
    if let Some(ref password) = cli.password {
        session.set_password(password.clone());
    }
    session.initialize().context("terminal probe failed")?;

    if interactive && mode >= 2 && session.version() < map::MIN_V2_VERSION {
        eprintln!(
            "firmware version 0x{:x} is below 0x{:x}, falling back to line mode",
            session.version(),
            map::MIN_V2_VERSION
        );
        mode = 1;
    }
    session.set_echo(interactive && mode == 2);

    if cli.reset {
        session.reset().context("session reset failed")?;
    }

    let outcome = if interactive {
        if mode == 1 {
            shell::run_line_mode(&mut session)
        } else {
            // Any other requested mode falls through to the raw-byte shell.
            shell::run_raw_mode(&mut session)
        }
    } else {
        run_once(&mut session, command.as_deref().unwrap_or_default())
    };

    let locked = session.lock();
    outcome?;
    locked.context("failed to lock terminal")?;
    Ok(())
}

impl Cli {
    /// Resolves the one-shot command sources; `None` means interactive.
    fn single_command(&self) -> Option<String> {
        if let Some(ref command) = self.command {
            return Some(command.clone());
        }
        if let Some(ref pair) = self.get {
            return Some(format!("u3vget {} {}", pair[0], pair[1]));
        }
        if let Some(ref pair) = self.put {
            return Some(format!("u3vput {} {}", pair[0], pair[1]));
        }
        if !self.rest.is_empty() {
            return Some(self.rest.join(" "));
        }
        None
    }
}

/// Executes a single command: transfer meta-commands run locally, anything
/// else is sent to the remote shell and its output drained once.
fn run_once<C: BulkChannel>(session: &mut Session<C>, command: &str) -> Result<()> {
    if let Some(meta) = transfer::parse_meta(command)? {
        return transfer::execute(session, &meta);
    }
    session.send_command(command)?;
    let out = session.drain_output(u3vterm::DRAIN_IDLE, u3vterm::DRAIN_MAX)?;
    if !out.is_empty() {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&out)?;
        stdout.flush()?;
    }
    Ok(())
}

/// Interactive picker for when several devices match and no serial was given.
fn choose_device(devices: &[DeviceInfo]) -> Option<usize> {
    eprintln!("Multiple USB3 Vision devices detected:");
    for (idx, dev) in devices.iter().enumerate() {
        let serial = dev.serial.as_deref().unwrap_or("<no-serial>");
        eprintln!("  [{idx}] bus {} addr {}, serial: {serial}", dev.bus, dev.address);
    }
    loop {
        eprint!("Select device index: ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).ok()? == 0 {
            return None;
        }
        match line.trim().parse::<usize>() {
            Ok(idx) if idx < devices.len() => return Some(idx),
            _ => eprintln!(
                "Invalid selection. Enter a number between 0 and {}.",
                devices.len() - 1
            ),
        }
    }
}

/// Parses a u16 from decimal or `0x`-prefixed hex.
fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid 16-bit value '{s}'"))
}
