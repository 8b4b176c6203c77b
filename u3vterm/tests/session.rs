//! End-to-end tests against an in-memory terminal register bank.
//!
//! `FakeDevice` services U3VCP read/write-memory frames the way the
//! firmware does: a terminal bank with auth and session bits, a TTY byte
//! buffer, and a polled file channel over a tiny in-memory file store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use u3vterm::map::{self, ctrl, file_status, status};
use u3vterm::{BulkChannel, Error, Session};
use u3vterm_proto::{self as proto, HostCommand};

const PASSWORD: &str = "open-sesame";

#[derive(Default)]
struct FakeDevice {
    magic: u32,
    probe_version: u32,
    version_reg: u32,
    chunk_hint: u32,
    term_status: u32,
    start_pending: bool,
    polls_until_ready: u32,

    password: Vec<u8>,
    auth_buf: Vec<u8>,
    auth_status: u32,
    lock_writes: u32,

    tty_in: Vec<u8>,
    tty_out: Vec<u8>,
    controls: Vec<u32>,

    files: HashMap<String, Vec<u8>>,
    readonly: bool,
    close_fails: bool,
    file_path: Vec<u8>,
    file_status: u32,
    file_result: u32,
    file_size: u64,
    read_data: Vec<u8>,
    write_buf: Vec<u8>,
    open_path: Option<String>,

    reply: Option<Vec<u8>>,
}

impl FakeDevice {
    fn new() -> Self {
        FakeDevice {
            magic: map::TERMINAL_MAGIC,
            probe_version: map::MIN_V2_VERSION,
            password: PASSWORD.as_bytes().to_vec(),
            ..FakeDevice::default()
        }
    }

    fn reg(value: u32) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    fn staged_path(&self) -> String {
        let end = self
            .file_path
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.file_path.len());
        String::from_utf8_lossy(&self.file_path[..end]).into_owned()
    }

    fn read_term_status(&mut self) -> u32 {
        if self.start_pending {
            if self.polls_until_ready == 0 {
                self.term_status |= status::READY;
                self.start_pending = false;
            } else {
                self.polls_until_ready -= 1;
            }
        }
        self.term_status
    }

    fn read_file_status(&self) -> u32 {
        let mut st = self.file_status;
        if st & file_status::READING != 0 && self.read_data.is_empty() {
            st |= file_status::EOF;
        }
        st
    }

    fn mem_read(&mut self, address: u32, size: u16) -> Vec<u8> {
        let size = usize::from(size);
        match (address, size) {
            (map::REG_MAGIC, 8) => {
                let mut out = Self::reg(self.magic);
                out.extend_from_slice(&self.probe_version.to_le_bytes());
                out
            }
            (map::REG_MAGIC, 4) => Self::reg(self.magic),
            (map::REG_VERSION, 4) => Self::reg(self.version_reg),
            (map::REG_CHUNK_HINT, 4) => Self::reg(self.chunk_hint),
            (map::REG_STATUS, 4) => {
                let st = self.read_term_status();
                Self::reg(st)
            }
            (map::REG_OUTPUT_AVAIL, 4) => Self::reg(self.tty_out.len() as u32),
            (map::REG_AUTH_STATUS, 4) => Self::reg(self.auth_status),
            (map::REG_FILE_STATUS, 4) => Self::reg(self.read_file_status()),
            (map::REG_FILE_RESULT, 4) => Self::reg(self.file_result),
            (map::REG_FILE_SIZE_LOW, 4) => Self::reg(self.file_size as u32),
            (map::REG_FILE_SIZE_HIGH, 4) => Self::reg((self.file_size >> 32) as u32),
            (map::REG_FILE_DATA_AVAIL, 4) => {
                Self::reg(self.read_data.len().min(map::FILE_DATA_WINDOW) as u32)
            }
            (map::REG_FILE_DATA, n) => {
                assert!(n <= self.read_data.len(), "read beyond staged file data");
                self.read_data.drain(..n).collect()
            }
            (map::REG_TTY_DATA, n) => {
                assert!(n <= self.tty_out.len(), "read beyond buffered output");
                self.tty_out.drain(..n).collect()
            }
            _ => panic!("unexpected read of {size} bytes at 0x{address:x}"),
        }
    }

    fn mem_write(&mut self, address: u32, data: &[u8]) {
        match address {
            map::REG_STATUS => {
                let value = u32::from_le_bytes(data.try_into().expect("control word"));
                assert!(
                    value & ctrl::ECHO_ENABLE == 0 || value & ctrl::ECHO_DISABLE == 0,
                    "both echo bits set in control word 0x{value:x}"
                );
                self.controls.push(value);
                if value & ctrl::CLEAR_FLAGS != 0 {
                    self.term_status &= !(status::OVERFLOW | status::ERROR);
                }
                if value & ctrl::RESET != 0 {
                    self.tty_out.clear();
                    self.term_status &= !status::READY;
                    self.start_pending = true;
                }
                if value & ctrl::START != 0 {
                    self.start_pending = true;
                }
            }
            map::REG_AUTH_BUF => self.auth_buf = data.to_vec(),
            map::REG_AUTH_CMD => {
                let value = u32::from_le_bytes(data.try_into().expect("auth command"));
                if value == 1 {
                    self.auth_status = u32::from(self.auth_buf == self.password);
                } else {
                    self.auth_status = 0;
                    self.lock_writes += 1;
                }
            }
            map::REG_TTY_DATA => self.tty_in.extend_from_slice(data),
            map::REG_FILE_PATH => self.file_path = data.to_vec(),
            map::REG_FILE_CMD => {
                let value = u32::from_le_bytes(data.try_into().expect("file command"));
                self.file_command(value);
            }
            map::REG_FILE_DATA => {
                if self.readonly {
                    self.file_status |= file_status::ERROR;
                    self.file_result = 13; // EACCES
                } else {
                    self.write_buf.extend_from_slice(data);
                }
            }
            _ => panic!("unexpected write of {} bytes at 0x{address:x}", data.len()),
        }
    }

    fn file_command(&mut self, value: u32) {
        match value {
            4 => {
                // Reset
                self.file_status = 0;
                self.file_result = 0;
                self.file_size = 0;
                self.file_path.clear();
                self.read_data.clear();
                self.write_buf.clear();
                self.open_path = None;
            }
            1 => {
                // OpenRead
                let path = self.staged_path();
                match self.files.get(&path) {
                    Some(content) => {
                        self.read_data = content.clone();
                        self.file_size = content.len() as u64;
                        self.file_status = file_status::READING | file_status::OPEN;
                        self.open_path = Some(path);
                    }
                    None => {
                        self.file_status |= file_status::ERROR;
                        self.file_result = 2; // ENOENT
                    }
                }
            }
            2 => {
                // OpenWrite
                let path = self.staged_path();
                self.write_buf.clear();
                self.file_status = file_status::WRITING | file_status::OPEN;
                self.open_path = Some(path);
            }
            3 => {
                // Close
                if self.close_fails {
                    self.file_status |= file_status::ERROR;
                    self.file_result = 5; // EIO
                    return;
                }
                if self.file_status & file_status::WRITING != 0 {
                    if let Some(path) = self.open_path.take() {
                        self.files.insert(path, std::mem::take(&mut self.write_buf));
                    }
                }
                self.file_status &=
                    !(file_status::READING | file_status::WRITING | file_status::OPEN);
                self.open_path = None;
            }
            other => panic!("unexpected file command {other}"),
        }
    }
}

/// Shares one fake device between a session and the test body.
#[derive(Clone)]
struct Chan(Rc<RefCell<FakeDevice>>);

impl BulkChannel for Chan {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut dev = self.0.borrow_mut();
        let (header, cmd) = proto::parse_command(data).expect("well-formed command frame");
        let reply = match cmd {
            HostCommand::ReadMem { address, size } => {
                let bytes = dev.mem_read(address as u32, size);
                proto::encode_read_mem_ack(header.id, &bytes).expect("ack fits one frame")
            }
            HostCommand::WriteMem { address, data } => {
                dev.mem_write(address as u32, data);
                proto::encode_write_mem_ack(header.id, data.len() as u16)
            }
        };
        dev.reply = Some(reply);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame = self
            .0
            .borrow_mut()
            .reply
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply staged"))?;
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }
}

fn session_over(dev: FakeDevice) -> (Session<Chan>, Rc<RefCell<FakeDevice>>) {
    let shared = Rc::new(RefCell::new(dev));
    let mut session = Session::new(Chan(shared.clone()));
    session.set_password(PASSWORD);
    (session, shared)
}

fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

fn drain_now<C: BulkChannel>(session: &mut Session<C>) -> Vec<u8> {
    session
        .drain_output(Duration::ZERO, Duration::from_secs(1))
        .expect("drain")
}

#[test]
fn probe_reports_version_and_default_chunk() {
    let (mut session, _) = session_over(FakeDevice::new());
    session.initialize().unwrap();
    assert_eq!(session.version(), map::MIN_V2_VERSION);
    assert_eq!(session.chunk_hint(), map::DEFAULT_CHUNK);
}

#[test]
fn probe_honors_device_chunk_hint() {
    let mut dev = FakeDevice::new();
    dev.chunk_hint = 64;
    let (mut session, _) = session_over(dev);
    session.initialize().unwrap();
    assert_eq!(session.chunk_hint(), 64);
}

#[test]
fn explicit_version_register_overrides_probe_word() {
    let mut dev = FakeDevice::new();
    dev.probe_version = 0x0001_0001;
    dev.version_reg = 0x0001_0002;
    let (mut session, _) = session_over(dev);
    session.initialize().unwrap();
    assert_eq!(session.version(), 0x0001_0002);
}

#[test]
fn probe_rejects_bad_magic() {
    let mut dev = FakeDevice::new();
    dev.magic = 0xDEAD_BEEF;
    let (mut session, _) = session_over(dev);
    match session.initialize() {
        Err(Error::BadTerminalMagic { got, .. }) => assert_eq!(got, 0xDEAD_BEEF),
        other => panic!("expected BadTerminalMagic, got {other:?}"),
    }
}

#[test]
fn auth_stages_password_then_unlocks() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.ensure_session().unwrap();
    let dev = dev.borrow();
    assert_eq!(dev.auth_buf, PASSWORD.as_bytes());
    assert_eq!(dev.auth_status, 1);
}

#[test]
fn wrong_password_fails_before_start() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.set_password("not-it");
    match session.ensure_session() {
        Err(Error::AuthFailed) => {}
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    assert!(dev.borrow().controls.is_empty(), "no control write after failed auth");
}

#[test]
fn missing_password_is_auth_required() {
    let shared = Rc::new(RefCell::new(FakeDevice::new()));
    let mut session = Session::new(Chan(shared.clone()));
    match session.ensure_session() {
        Err(Error::AuthRequired) => {}
        other => panic!("expected AuthRequired, got {other:?}"),
    }
}

#[test]
fn start_polls_until_ready() {
    let mut dev = FakeDevice::new();
    dev.polls_until_ready = 2;
    let (mut session, dev) = session_over(dev);
    session.ensure_session().unwrap();
    let dev = dev.borrow();
    assert_eq!(
        dev.controls,
        [ctrl::START | ctrl::CLEAR_FLAGS | ctrl::ECHO_ENABLE]
    );
    assert_ne!(dev.term_status & status::READY, 0);
}

#[test]
fn echo_disable_bit_follows_setting() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.set_echo(false);
    session.ensure_session().unwrap();
    assert_eq!(
        dev.borrow().controls,
        [ctrl::START | ctrl::CLEAR_FLAGS | ctrl::ECHO_DISABLE]
    );
}

#[test]
fn send_command_appends_newline() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.send_command("uptime").unwrap();
    assert_eq!(dev.borrow().tty_in, b"uptime\n");
}

#[test]
fn send_command_keeps_existing_newline() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.send_command("uptime\n").unwrap();
    assert_eq!(dev.borrow().tty_in, b"uptime\n");
}

#[test]
fn drain_collects_pending_output() {
    let mut dev = FakeDevice::new();
    dev.tty_out = b"up 3 days, load average: 0.01".to_vec();
    let (mut session, _) = session_over(dev);
    let out = drain_now(&mut session);
    assert_eq!(out, b"up 3 days, load average: 0.01");
}

#[test]
fn long_output_is_read_in_chunk_hint_slices() {
    let payload = test_payload(3000);
    let mut dev = FakeDevice::new();
    dev.tty_out = payload.clone();
    let (mut session, _) = session_over(dev);
    let out = drain_now(&mut session);
    assert_eq!(out, payload);
}

#[test]
fn download_roundtrip() {
    let payload = test_payload(100_000);
    let mut dev = FakeDevice::new();
    dev.files.insert("/tmp/a.bin".into(), payload.clone());
    let (mut session, dev) = session_over(dev);

    let mut sink = Vec::new();
    let mut last = None;
    let received = session
        .download("/tmp/a.bin", &mut sink, &mut |p| last = Some(p))
        .unwrap();

    assert_eq!(received, 100_000);
    assert_eq!(sink, payload);
    let last = last.expect("progress was reported");
    assert_eq!(last.transferred, 100_000);
    assert_eq!(last.total, Some(100_000));
    // channel closed again
    assert_eq!(dev.borrow().file_status & file_status::OPEN, 0);
}

#[test]
fn download_missing_file_reports_enoent() {
    let (mut session, _) = session_over(FakeDevice::new());
    let mut sink = Vec::new();
    match session.download("/no/such/file", &mut sink, &mut |_| {}) {
        Err(Error::File { context, errno }) => {
            assert_eq!(context, "open file");
            assert_eq!(errno, 2);
        }
        other => panic!("expected File error, got {other:?}"),
    }
}

#[test]
fn empty_remote_path_is_rejected() {
    let (mut session, _) = session_over(FakeDevice::new());
    let mut sink = Vec::new();
    match session.download("", &mut sink, &mut |_| {}) {
        Err(Error::PathRequired) => {}
        other => panic!("expected PathRequired, got {other:?}"),
    }
}

#[test]
fn path_length_boundary() {
    let longest = "p".repeat(map::FILE_PATH_CAPACITY - 1);
    let mut dev = FakeDevice::new();
    dev.files.insert(longest.clone(), b"x".to_vec());
    let (mut session, _) = session_over(dev);

    let mut sink = Vec::new();
    session.download(&longest, &mut sink, &mut |_| {}).unwrap();
    assert_eq!(sink, b"x");

    let too_long = "p".repeat(map::FILE_PATH_CAPACITY);
    match session.download(&too_long, &mut sink, &mut |_| {}) {
        Err(Error::PathTooLong { len, max }) => {
            assert_eq!(len, map::FILE_PATH_CAPACITY);
            assert_eq!(max, map::FILE_PATH_CAPACITY - 1);
        }
        other => panic!("expected PathTooLong, got {other:?}"),
    }
}

#[test]
fn upload_roundtrip() {
    let payload = test_payload(10_000);
    let (mut session, dev) = session_over(FakeDevice::new());

    let mut source = io::Cursor::new(payload.clone());
    let sent = session
        .upload(&mut source, Some(payload.len() as u64), "/tmp/up.bin", &mut |_| {})
        .unwrap();

    assert_eq!(sent, 10_000);
    assert_eq!(dev.borrow().files["/tmp/up.bin"], payload);
}

#[test]
fn upload_permission_error_surfaces_errno() {
    let mut dev = FakeDevice::new();
    dev.readonly = true;
    let (mut session, _) = session_over(dev);

    let mut source = io::Cursor::new(vec![0u8; 128]);
    let err = session
        .upload(&mut source, Some(128), "/ro/b.bin", &mut |_| {})
        .unwrap_err();
    match &err {
        Error::File { context, errno } => {
            assert_eq!(*context, "u3vput");
            assert_eq!(*errno, 13);
        }
        other => panic!("expected File error, got {other:?}"),
    }
    assert_eq!(err.to_string(), "u3vput failed: errno=13 (Permission denied)");
}

#[test]
fn failing_close_downgrades_download() {
    let payload = test_payload(64);
    let mut dev = FakeDevice::new();
    dev.files.insert("/tmp/c.bin".into(), payload.clone());
    dev.close_fails = true;
    let (mut session, _) = session_over(dev);

    let mut sink = Vec::new();
    match session.download("/tmp/c.bin", &mut sink, &mut |_| {}) {
        Err(Error::File { context, errno }) => {
            assert_eq!(context, "file transfer");
            assert_eq!(errno, 5);
        }
        other => panic!("expected File error from close, got {other:?}"),
    }
    // data arrived before the close failed
    assert_eq!(sink, payload);
}

#[test]
fn drop_locks_the_device() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.ensure_session().unwrap();
    assert_eq!(dev.borrow().auth_status, 1);
    drop(session);
    assert_eq!(dev.borrow().auth_status, 0);
}

#[test]
fn explicit_lock_is_not_repeated_on_drop() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.ensure_session().unwrap();
    session.lock().unwrap();
    drop(session);
    let dev = dev.borrow();
    assert_eq!(dev.auth_status, 0);
    assert_eq!(dev.lock_writes, 1);
}

#[test]
fn drop_locks_even_after_probe_failure() {
    let mut dev = FakeDevice::new();
    dev.magic = 0;
    let (mut session, dev) = session_over(dev);
    let _ = session.initialize();
    drop(session);
    assert_eq!(dev.borrow().lock_writes, 1);
}

#[test]
fn reset_preserves_auth_and_restarts() {
    let (mut session, dev) = session_over(FakeDevice::new());
    session.ensure_session().unwrap();
    session.reset().unwrap();
    let dev = dev.borrow();
    assert_eq!(dev.auth_status, 1, "reset must not clear auth");
    assert_ne!(dev.controls[1] & ctrl::RESET, 0);
    assert_ne!(dev.term_status & status::READY, 0);
}
