//! Host-side client for a USB3 Vision terminal mailbox.
//!
//! Speaks U3VCP read/write-memory over a claimed bulk interface to drive a
//! device-side terminal register bank: session and auth control, a
//! byte-oriented shell stream, and a polled file-transfer sub-protocol.
//!
//! [`Session`] is the main entry point. It owns a [`Transport`] over any
//! [`BulkChannel`]; real hardware goes through [`UsbChannel`].
//!
//! ```no_run
//! use u3vterm::{Session, UsbChannel, DEFAULT_PID, DEFAULT_VID};
//!
//! let chan = UsbChannel::open(DEFAULT_VID, DEFAULT_PID, None, |_| None)?;
//! let mut session = Session::new(chan);
//! session.set_password("open-sesame");
//! session.send_command("uptime")?;
//! let _output = session.drain_output(u3vterm::DRAIN_IDLE, u3vterm::DRAIN_MAX)?;
//! session.lock()?;
//! # Ok::<(), u3vterm::Error>(())
//! ```

mod error;
pub mod map;
mod regs;
mod session;
mod transport;
mod usb;
mod xfer;

pub use error::{Error, Result};
pub use session::{DRAIN_IDLE, DRAIN_MAX, Session};
pub use transport::{BulkChannel, Transport};
pub use usb::{DEFAULT_PID, DEFAULT_VID, DeviceInfo, TRANSFER_TIMEOUT, UsbChannel};
pub use xfer::Progress;
