//! Error types for u3vterm operations.

use std::io;

use u3vterm_proto::FrameError;

/// Alias for `Result<T, u3vterm::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by transport, session, and file-transfer operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// USB enumeration or interface setup failed.
    #[error("usb: {0}")]
    Usb(#[from] rusb::Error),

    /// No device matched the vendor/product ids (and serial filter).
    #[error("no device {vid:04x}:{pid:04x}{}", serial_suffix(.serial))]
    DeviceNotFound {
        vid: u16,
        pid: u16,
        serial: Option<String>,
    },

    /// The device exposes no U3V control interface with bulk IN/OUT endpoints.
    #[error("no USB3 Vision control interface with bulk IN/OUT endpoints")]
    NoControlInterface,

    /// The caller declined to choose between multiple matching devices.
    #[error("device selection cancelled")]
    SelectionCancelled,

    /// A bulk transfer failed or moved fewer bytes than required.
    #[error("bulk transfer: {0}")]
    Bulk(#[source] io::Error),

    /// The device sent a malformed frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An acknowledgement carried the wrong request id.
    #[error("ack id mismatch: got {got}, expected {want}")]
    IdMismatch { got: u16, want: u16 },

    /// The device answered with a command this transaction cannot accept.
    #[error("unexpected ack command 0x{got:04x}")]
    UnexpectedCommand { got: u16 },

    /// An ack's size field disagreed with the request.
    #[error("transfer size mismatch: got {got}, expected {want}")]
    SizeMismatch { got: u16, want: u16 },

    /// The device kept deferring with pending acks.
    #[error("too many pending acks")]
    TooManyPending,

    /// The terminal bank did not present its magic number.
    #[error("bad terminal magic 0x{got:08x}, expected 0x{want:08x}")]
    BadTerminalMagic { got: u32, want: u32 },

    /// The terminal is locked and no password was supplied.
    #[error("terminal locked: password required")]
    AuthRequired,

    /// The device rejected the supplied password.
    #[error("authentication failed")]
    AuthFailed,

    /// The session did not become ready within its deadline.
    #[error("timed out waiting for terminal session")]
    SessionTimeout,

    /// File transfers need a non-empty remote path.
    #[error("remote path must not be empty")]
    PathRequired,

    /// The remote path does not fit the device's path register.
    #[error("remote path of {len} bytes exceeds the {max}-byte limit")]
    PathTooLong { len: usize, max: usize },

    /// The device never opened the file channel.
    #[error("timed out waiting for file channel")]
    FileOpenTimeout,

    /// The device reported a file operation failure.
    #[error("{context} failed: errno={errno} ({})", errno_desc(*.errno))]
    File { context: &'static str, errno: i32 },

    /// Reading the local source or writing the local sink failed.
    #[error("local i/o: {0}")]
    Local(#[source] io::Error),
}

fn serial_suffix(serial: &Option<String>) -> String {
    match serial {
        Some(s) => format!(" with serial '{s}'"),
        None => String::new(),
    }
}

/// Human-readable description for a POSIX errno value.
fn errno_desc(errno: i32) -> &'static str {
    nix::errno::Errno::from_raw(errno).desc()
}
