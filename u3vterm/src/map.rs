//! Terminal register bank layout and bit assignments.
//!
//! The device maps a terminal mailbox at [`TERMINAL_BASE`]. All registers
//! are 32-bit little-endian words; the path, auth, TTY, and file windows
//! are byte-addressed ranges.

/// Base address of the terminal register bank.
pub const TERMINAL_BASE: u32 = 0x3_0000;

/// Read-only magic register; must read [`TERMINAL_MAGIC`].
pub const REG_MAGIC: u32 = TERMINAL_BASE;
/// Read-only firmware protocol version.
pub const REG_VERSION: u32 = TERMINAL_BASE + 0x04;
/// Status bits on read, control bits on write.
pub const REG_STATUS: u32 = TERMINAL_BASE + 0x08;
/// Bytes of device-to-host TTY output currently buffered.
pub const REG_OUTPUT_AVAIL: u32 = TERMINAL_BASE + 0x0C;
/// Suggested maximum bytes per TTY data transaction; 0 = host default.
pub const REG_CHUNK_HINT: u32 = TERMINAL_BASE + 0x10;
/// 0 = locked, non-zero = authenticated.
pub const REG_AUTH_STATUS: u32 = TERMINAL_BASE + 0x14;
/// Write 1 to attempt auth against the staged password, 0 to lock.
pub const REG_AUTH_CMD: u32 = TERMINAL_BASE + 0x18;
/// Write-only password staging area.
pub const REG_AUTH_BUF: u32 = TERMINAL_BASE + 0x1C;

/// File-transfer command register; see [`FileCmd`].
pub const REG_FILE_CMD: u32 = TERMINAL_BASE + 0x40;
/// File-transfer status bits; see [`file_status`].
pub const REG_FILE_STATUS: u32 = TERMINAL_BASE + 0x44;
/// Last file operation error code (POSIX errno).
pub const REG_FILE_RESULT: u32 = TERMINAL_BASE + 0x48;
/// Low word of the 64-bit file size exposed on open-for-read.
pub const REG_FILE_SIZE_LOW: u32 = TERMINAL_BASE + 0x4C;
/// High word of the file size.
pub const REG_FILE_SIZE_HIGH: u32 = TERMINAL_BASE + 0x50;
/// Low word of the 64-bit cursor position.
pub const REG_FILE_CURSOR_LOW: u32 = TERMINAL_BASE + 0x54;
/// High word of the cursor position.
pub const REG_FILE_CURSOR_HIGH: u32 = TERMINAL_BASE + 0x58;
/// Bytes currently readable from the file data window.
pub const REG_FILE_DATA_AVAIL: u32 = TERMINAL_BASE + 0x5C;
/// NUL-terminated UTF-8 path staging area, [`FILE_PATH_CAPACITY`] bytes.
pub const REG_FILE_PATH: u32 = TERMINAL_BASE + 0x60;
/// File data window, at most [`FILE_DATA_WINDOW`] bytes per transaction.
pub const REG_FILE_DATA: u32 = TERMINAL_BASE + 0xC0;
/// Bidirectional TTY byte stream: write = stdin to device, read = output.
pub const REG_TTY_DATA: u32 = TERMINAL_BASE + 0x100;

/// Expected value of [`REG_MAGIC`] ("TERM").
pub const TERMINAL_MAGIC: u32 = 0x5445_524D;
/// Minimum firmware version for raw byte-stream interactive mode.
pub const MIN_V2_VERSION: u32 = 0x0001_0002;
/// Capacity of the path staging area, NUL terminator included.
pub const FILE_PATH_CAPACITY: usize = 0x60;
/// Width of the file data window.
pub const FILE_DATA_WINDOW: usize = 0x40;
/// TTY chunk size used when the device does not suggest one.
pub const DEFAULT_CHUNK: u32 = 512;

/// Status register bits (read direction).
pub mod status {
    pub const READY: u32 = 1 << 0;
    pub const CHILD_ALIVE: u32 = 1 << 1;
    pub const OUTPUT_PENDING: u32 = 1 << 2;
    pub const OVERFLOW: u32 = 1 << 3;
    pub const ERROR: u32 = 1 << 4;
}

/// Control register bits (write direction).
pub mod ctrl {
    pub const START: u32 = 1 << 0;
    pub const RESET: u32 = 1 << 1;
    pub const SIGINT: u32 = 1 << 2;
    pub const SIGTERM: u32 = 1 << 3;
    pub const CLEAR_FLAGS: u32 = 1 << 4;
    pub const ECHO_ENABLE: u32 = 1 << 5;
    pub const ECHO_DISABLE: u32 = 1 << 6;
}

/// File status register bits.
pub mod file_status {
    pub const BUSY: u32 = 1 << 0;
    pub const ERROR: u32 = 1 << 1;
    pub const EOF: u32 = 1 << 2;
    pub const READING: u32 = 1 << 3;
    pub const WRITING: u32 = 1 << 4;
    pub const OPEN: u32 = 1 << 5;
    pub const PATH_READY: u32 = 1 << 6;
}

/// Commands accepted by [`REG_FILE_CMD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileCmd {
    None = 0,
    OpenRead = 1,
    OpenWrite = 2,
    Close = 3,
    Reset = 4,
}
