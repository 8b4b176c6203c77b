//! Local side of the `u3vget`/`u3vput` meta-commands: argument parsing,
//! local file handling, and progress rendering.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};

use anyhow::{Context as _, Result, bail};
use u3vterm::{BulkChannel, Progress, Session};

/// A parsed file-transfer meta-command.
#[derive(Debug, PartialEq, Eq)]
pub enum Meta<'a> {
    Get { remote: &'a str, local: &'a str },
    Put { local: &'a str, remote: &'a str },
}

/// True when the first whitespace token is a transfer keyword.
pub fn is_meta(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("u3vget" | "u3vput"))
}

/// Recognizes `u3vget`/`u3vput` lines.
///
/// Returns `Ok(None)` for ordinary commands and an error for a transfer
/// keyword with the wrong number of arguments.
pub fn parse_meta(line: &str) -> Result<Option<Meta<'_>>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.first().copied() {
        Some("u3vget") => {
            let [_, remote, local] = tokens[..] else {
                bail!("usage: u3vget <remote-path> <local-path>");
            };
            Ok(Some(Meta::Get { remote, local }))
        }
        Some("u3vput") => {
            let [_, local, remote] = tokens[..] else {
                bail!("usage: u3vput <local-path> <remote-path>");
            };
            Ok(Some(Meta::Put { local, remote }))
        }
        _ => Ok(None),
    }
}

/// Runs a parsed transfer against the session, rendering progress on stderr
/// so piped stdout stays clean.
pub fn execute<C: BulkChannel>(session: &mut Session<C>, meta: &Meta<'_>) -> Result<()> {
    match meta {
        Meta::Get { remote, local } => download(session, remote, local),
        Meta::Put { local, remote } => upload(session, local, remote),
    }
}

fn download<C: BulkChannel>(session: &mut Session<C>, remote: &str, local: &str) -> Result<()> {
    let file =
        File::create(local).with_context(|| format!("unable to create local file '{local}'"))?;
    let mut sink = BufWriter::new(file);
    let mut meter = Meter::new("Downloading");
    let received = session.download(remote, &mut sink, &mut |p| meter.update(p))?;
    sink.flush()
        .with_context(|| format!("failed writing local file '{local}'"))?;
    meter.finish();
    eprintln!("Downloaded '{remote}' -> '{local}' ({received} bytes)");
    Ok(())
}

fn upload<C: BulkChannel>(session: &mut Session<C>, local: &str, remote: &str) -> Result<()> {
    let file = File::open(local).with_context(|| format!("unable to open local file '{local}'"))?;
    let len = file.metadata().map(|m| m.len()).ok().filter(|l| *l > 0);
    let mut source = BufReader::new(file);
    let mut meter = Meter::new("Uploading");
    let sent = session.upload(&mut source, len, remote, &mut |p| meter.update(p))?;
    meter.finish();
    eprintln!("Uploaded '{local}' -> '{remote}' ({sent} bytes)");
    Ok(())
}

/// Carriage-return progress meter on stderr.
struct Meter {
    label: &'static str,
    printed: bool,
}

impl Meter {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            printed: false,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn update(&mut self, p: Progress) {
        self.printed = true;
        match p.total {
            Some(total) if total > 0 => {
                let pct = 100.0 * p.transferred as f64 / total as f64;
                eprint!("\r{}: {}/{} ({pct:.1}%)", self.label, p.transferred, total);
            }
            _ => eprint!("\r{}: {} bytes", self.label, p.transferred),
        }
        let _ = std::io::stderr().flush();
    }

    /// Terminates the carriage-return line once any progress was shown.
    fn finish(&self) {
        if self.printed {
            eprintln!();
        }
    }
}
