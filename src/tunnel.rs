//! Console/debug multiplexer: the interactive session runtime.
//!
//! Reads from the remote serial-over-TCP stream, splitting console bytes
//! from in-band debug frames; forwards local console input to the remote;
//! and bridges debug frames to a locally-listening debugger TCP peer.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

const REMOTE: Token = Token(0);
const STDIN: Token = Token(1);

const STX: u8 = 0x02;
const ETX: u8 = 0x04;
const FRAME_TAG: u8 = b'G';

/// The byte-stream framing state for the remote→local direction. Explicit
/// rather than nested reads, so a lone 0x02 can never swallow the byte after
/// it.
enum FrameState {
    Normal,
    SawStx,
    InFrame(Vec<u8>),
}

/// Where the debug bridge currently stands with respect to a debugger peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachState {
    Idle,
    Listening,
    Attached,
}

struct BridgeState {
    attach_state: AttachState,
    pending_out: Vec<u8>,
    attached: Option<TcpStream>,
}

struct BridgeShared {
    state: Mutex<BridgeState>,
    remote_write: Arc<Mutex<TcpStream>>,
}

/// Proxies in-band debug frames to a loopback TCP listener a symbolic
/// debugger can attach to.
pub struct DebugBridge {
    port: u16,
    listener: Mutex<Option<TcpListener>>,
    shared: Arc<BridgeShared>,
}

impl DebugBridge {
    fn new(remote_write: Arc<Mutex<TcpStream>>) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener: Mutex::new(Some(listener)),
            shared: Arc::new(BridgeShared {
                state: Mutex::new(BridgeState {
                    attach_state: AttachState::Idle,
                    pending_out: Vec::new(),
                    attached: None,
                }),
                remote_write,
            }),
        })
    }

    /// The OS-assigned loopback port the debugger should attach to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Delivers a freshly-parsed debug frame. Arms the accept thread on the
    /// first call; afterward, either buffers the frame or forwards it
    /// straight to the attached debugger.
    fn deliver_frame(&self, frame: &[u8]) {
        let mut state = self.shared.state.lock().unwrap();

        let just_armed = state.attach_state == AttachState::Idle;
        if just_armed {
            state.attach_state = AttachState::Listening;
        }

        match state.attached.as_mut() {
            Some(stream) => {
                if let Err(err) = stream.write_all(frame) {
                    log::warn!("debugger write failed: {err}");
                }
            }
            None => state.pending_out.extend_from_slice(frame),
        }

        drop(state);
        if just_armed {
            self.spawn_accept_thread();
        }
    }

    fn spawn_accept_thread(&self) {
        let listener = match self.listener.lock().unwrap().take() {
            Some(listener) => listener,
            None => return,
        };

        let shared = self.shared.clone();
        std::thread::spawn(move || accept_and_forward(listener, shared));
    }
}

/// Accepts exactly one debugger connection, flushes any buffered frames to
/// it, then continuously forwards debugger bytes into the remote stream
/// until either end closes. Only one attach is ever serviced: the listener
/// is dropped (and further connection attempts refused by the kernel) as
/// soon as this function takes ownership of it.
fn accept_and_forward(listener: TcpListener, shared: Arc<BridgeShared>) {
    let (mut stream, peer) = match listener.accept() {
        Ok(v) => v,
        Err(err) => {
            log::warn!("debugger accept failed: {err}");
            return;
        }
    };
    log::debug!("debugger attached from {peer}");

    let mut reader = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            log::warn!("cloning debugger stream failed: {err}");
            return;
        }
    };

    {
        let mut state = shared.state.lock().unwrap();
        if let Err(err) = stream.write_all(&state.pending_out) {
            log::warn!("flushing buffered debug frames failed: {err}");
            return;
        }
        state.pending_out.clear();
        state.attached = Some(stream);
        state.attach_state = AttachState::Attached;
    }

    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                log::warn!("debugger read failed: {err}");
                break;
            }
        };

        let mut remote = shared.remote_write.lock().unwrap();
        if let Err(err) = write_all_blocking(&mut remote, &buf[..n]) {
            log::warn!("forwarding debugger bytes to remote failed: {err}");
            break;
        }
    }
}

/// The live interactive session: the remote TCP stream plus the bridge that
/// exposes its in-band debug frames to a local debugger.
pub struct ConsoleTunnel {
    remote: mio::net::TcpStream,
    remote_write: Arc<Mutex<TcpStream>>,
    debug_bridge: DebugBridge,
}

impl ConsoleTunnel {
    /// Takes ownership of the TCP stream dialed to the backend's interactive
    /// service. The stream is put in non-blocking mode; a clone shared with
    /// the debug bridge inherits that mode too (it's a property of the
    /// underlying open file description, not of either file descriptor).
    pub fn new(remote: TcpStream) -> io::Result<Self> {
        remote.set_nonblocking(true)?;
        let remote_write = Arc::new(Mutex::new(remote.try_clone()?));
        let debug_bridge = DebugBridge::new(remote_write.clone())?;
        let remote = mio::net::TcpStream::from_std(remote);

        Ok(Self {
            remote,
            remote_write,
            debug_bridge,
        })
    }

    /// The loopback port a debugger should be pointed at.
    pub fn debugger_port(&self) -> u16 {
        self.debug_bridge.port()
    }

    /// Drives the session until the remote stream reaches EOF or a fatal
    /// I/O error occurs. `console_in` is read one readiness-notification at
    /// a time (raw-mode terminal input arrives byte by byte); `console_out`
    /// receives de-framed console bytes, flushed after every batch so the
    /// user never waits on a missing newline.
    pub fn run<I>(&mut self, mut console_in: I, mut console_out: impl Write) -> io::Result<()>
    where
        I: Read + AsRawFd,
    {
        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut self.remote, REMOTE, Interest::READABLE)?;

        let stdin_fd: RawFd = console_in.as_raw_fd();
        let mut stdin_source = SourceFd(&stdin_fd);
        poll.registry()
            .register(&mut stdin_source, STDIN, Interest::READABLE)?;

        let mut events = Events::with_capacity(128);
        let mut frame_state = FrameState::Normal;
        let mut remote_buf = [0u8; 4096];
        let mut stdin_buf = [0u8; 256];

        'outer: loop {
            poll.poll(&mut events, None)?;

            for event in events.iter() {
                match event.token() {
                    REMOTE => loop {
                        match self.remote.read(&mut remote_buf) {
                            Ok(0) => break 'outer,
                            Ok(n) => {
                                self.handle_remote_bytes(&remote_buf[..n], &mut frame_state, &mut console_out)?
                            }
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                            Err(err) => return Err(err),
                        }
                    },
                    STDIN => match console_in.read(&mut stdin_buf) {
                        Ok(0) => break 'outer,
                        Ok(n) => self.forward_to_remote(&stdin_buf[..n])?,
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => return Err(err),
                    },
                    _ => unreachable!("no other tokens are registered"),
                }
            }
        }

        Ok(())
    }

    fn handle_remote_bytes(
        &self,
        bytes: &[u8],
        state: &mut FrameState,
        console_out: &mut impl Write,
    ) -> io::Result<()> {
        for &byte in bytes {
            match state {
                FrameState::Normal => {
                    if byte == STX {
                        *state = FrameState::SawStx;
                    } else {
                        console_out.write_all(&[byte])?;
                    }
                }
                FrameState::SawStx => {
                    if byte == FRAME_TAG {
                        *state = FrameState::InFrame(Vec::new());
                    } else {
                        console_out.write_all(&[STX, byte])?;
                        *state = FrameState::Normal;
                    }
                }
                FrameState::InFrame(buf) => {
                    if byte == ETX {
                        self.debug_bridge.deliver_frame(buf);
                        *state = FrameState::Normal;
                    } else {
                        buf.push(byte);
                    }
                }
            }
        }

        console_out.flush()
    }

    fn forward_to_remote(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.remote_write.lock().unwrap();
        write_all_blocking(&mut guard, bytes)
    }
}

/// Writes the whole buffer to a (possibly non-blocking) stream, retrying
/// short writes and `WouldBlock` without reordering bytes.
fn write_all_blocking(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "remote closed during write")),
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the byte-level framing state machine directly against an
    /// in-memory sink, bypassing the mio loop and the debug bridge.
    struct Harness {
        state: FrameState,
        console: Vec<u8>,
        frames: Vec<Vec<u8>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: FrameState::Normal,
                console: Vec::new(),
                frames: Vec::new(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                match &mut self.state {
                    FrameState::Normal => {
                        if byte == STX {
                            self.state = FrameState::SawStx;
                        } else {
                            self.console.push(byte);
                        }
                    }
                    FrameState::SawStx => {
                        if byte == FRAME_TAG {
                            self.state = FrameState::InFrame(Vec::new());
                        } else {
                            self.console.push(STX);
                            self.console.push(byte);
                            self.state = FrameState::Normal;
                        }
                    }
                    FrameState::InFrame(buf) => {
                        if byte == ETX {
                            self.frames.push(std::mem::take(buf));
                            self.state = FrameState::Normal;
                        } else {
                            buf.push(byte);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn plain_stream_without_stx_passes_through() {
        // Property 4.
        let mut h = Harness::new();
        h.feed(b"hello, xinu\n");
        assert_eq!(h.console, b"hello, xinu\n");
        assert!(h.frames.is_empty());
    }

    #[test]
    fn framed_region_is_extracted_and_surrounding_bytes_survive() {
        // Property 5.
        let mut h = Harness::new();
        let mut input = b"prefix".to_vec();
        input.push(STX);
        input.push(FRAME_TAG);
        input.extend_from_slice(b"payload");
        input.push(ETX);
        input.extend_from_slice(b"suffix");

        h.feed(&input);
        assert_eq!(h.console, b"prefixsuffix");
        assert_eq!(h.frames, vec![b"payload".to_vec()]);
    }

    #[test]
    fn stx_not_followed_by_g_passes_through_verbatim() {
        // Property 6.
        let mut h = Harness::new();
        h.feed(&[STX, b'X']);
        assert_eq!(h.console, vec![STX, b'X']);
        assert!(h.frames.is_empty());
    }

    #[test]
    fn split_across_feeds_still_extracts_frame() {
        let mut h = Harness::new();
        h.feed(&[STX]);
        h.feed(&[FRAME_TAG]);
        h.feed(b"ab");
        h.feed(&[ETX]);
        h.feed(b"tail");

        assert_eq!(h.console, b"tail");
        assert_eq!(h.frames, vec![b"ab".to_vec()]);
    }

    #[test]
    fn debug_bridge_buffers_frames_before_attach() {
        let remote = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let remote_write = Arc::new(Mutex::new(TcpStream::connect(remote_addr).unwrap()));
        let _accepted = remote.accept().unwrap();

        let bridge = DebugBridge::new(remote_write).unwrap();
        bridge.deliver_frame(b"frame-one");
        bridge.deliver_frame(b"frame-two");

        let state = bridge.shared.state.lock().unwrap();
        assert_eq!(state.attach_state, AttachState::Listening);
        assert_eq!(state.pending_out, b"frame-oneframe-two");
    }

    #[test]
    fn debug_bridge_flushes_pending_frames_to_attaching_debugger() {
        let remote = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let remote_write = Arc::new(Mutex::new(TcpStream::connect(remote_addr).unwrap()));
        let _accepted = remote.accept().unwrap();

        let bridge = DebugBridge::new(remote_write).unwrap();
        bridge.deliver_frame(b"buffered");

        let debugger = TcpStream::connect((Ipv4Addr::LOCALHOST, bridge.port())).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut debugger = debugger;
        let mut buf = [0u8; 64];
        debugger.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let n = debugger.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"buffered");
    }
}
