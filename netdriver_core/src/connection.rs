use crate::config::{DriverSettings, default_drain_buffer_size, default_send_buffer_size};
use crate::error::{DriverError, Stage};
use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// IPv4 loopback first, IPv6 loopback second.
pub fn loopback_addrs(port: u16) -> [SocketAddr; 2] {
    [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
    ]
}

/// How a delivery ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Input written, write side half-closed, response drained to EOF or reset.
    Completed { drained: u64 },
    /// The server tore the connection down before the input was handed over.
    PeerClosedEarly { stage: Stage },
}

impl Delivery {
    pub fn drained(&self) -> u64 {
        match self {
            Delivery::Completed { drained } => *drained,
            Delivery::PeerClosedEarly { .. } => 0,
        }
    }
}

fn peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

fn stage_failed(stage: Stage, peer: SocketAddr, source: io::Error) -> DriverError {
    match source.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => DriverError::Timeout { stage, peer },
        _ => DriverError::Io {
            stage,
            peer,
            source,
        },
    }
}

/// Delivers inputs to one TCP port. Owns the drain buffer, so keep one per thread.
#[derive(Debug, Clone)]
pub struct ConnectionDriver {
    port: u16,
    send_buffer_size: usize,
    io_timeout: Option<Duration>,
    drain_buf: Vec<u8>,
}

impl ConnectionDriver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            send_buffer_size: default_send_buffer_size(),
            io_timeout: None,
            drain_buf: vec![0; default_drain_buffer_size()],
        }
    }

    pub fn from_settings(port: u16, settings: &DriverSettings) -> Self {
        Self {
            port,
            send_buffer_size: settings.send_buffer_size,
            io_timeout: settings.io_timeout(),
            drain_buf: vec![0; settings.drain_buffer_size.max(1)],
        }
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_drain_buffer_size(mut self, size: usize) -> Self {
        self.drain_buf = vec![0; size.max(1)];
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connects to the loopback port, IPv4 first, then IPv6.
    pub fn connect(&self) -> Result<(Socket, SocketAddr), DriverError> {
        let mut last_error = None;
        for addr in loopback_addrs(self.port) {
            match self.connect_addr(addr)? {
                Ok(socket) => return Ok((socket, addr)),
                Err(e) => {
                    debug!("connect({addr}) failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(DriverError::Connect {
            port: self.port,
            source: last_error
                .unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused)),
        })
    }

    /// Outer error is fatal; inner error means "try the next address".
    fn connect_addr(&self, addr: SocketAddr) -> Result<io::Result<Socket>, DriverError> {
        let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => socket,
            Err(e) => return Ok(Err(e)),
        };
        socket
            .set_send_buffer_size(self.send_buffer_size)
            .map_err(|e| stage_failed(Stage::SendBufferHint, addr, e))?;
        #[cfg(target_vendor = "apple")]
        socket
            .set_nosigpipe(true)
            .map_err(|e| stage_failed(Stage::Connect, addr, e))?;

        let target = SockAddr::from(addr);
        let connected = match self.io_timeout {
            Some(timeout) => socket.connect_timeout(&target, timeout),
            None => match socket.connect(&target) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => await_connect(&socket),
                other => other,
            },
        };
        if let Err(e) = connected {
            return self.connect_failed(addr, e).map(Err);
        }

        if let Some(timeout) = self.io_timeout {
            socket
                .set_read_timeout(Some(timeout))
                .and_then(|()| socket.set_write_timeout(Some(timeout)))
                .map_err(|e| stage_failed(Stage::Connect, addr, e))?;
        }
        Ok(Ok(socket))
    }

    /// An expired `io_timeout` is fatal; any other failure moves on to the
    /// next address.
    fn connect_failed(&self, addr: SocketAddr, e: io::Error) -> Result<io::Error, DriverError> {
        if self.io_timeout.is_some() && e.kind() == io::ErrorKind::TimedOut {
            return Err(stage_failed(Stage::Connect, addr, e));
        }
        Ok(e)
    }

    /// Runs one full round trip for `input`: connect, write everything,
    /// half-close, drain until the server closes. The socket is dropped on
    /// every path.
    pub fn deliver(&mut self, input: &[u8]) -> Result<Delivery, DriverError> {
        let (socket, peer) = self.connect()?;

        if let Err(e) = send_all(&socket, input) {
            if peer_gone(&e) {
                debug!("{peer} went away while sending {} bytes: {e}", input.len());
                return Ok(Delivery::PeerClosedEarly { stage: Stage::Write });
            }
            return Err(stage_failed(Stage::Write, peer, e));
        }

        // FIN: a well-behaved server now processes the input and answers.
        if let Err(e) = socket.shutdown(Shutdown::Write) {
            if e.kind() == io::ErrorKind::NotConnected {
                debug!("{peer} closed before the write side was shut down");
                return Ok(Delivery::PeerClosedEarly {
                    stage: Stage::HalfClose,
                });
            }
            return Err(stage_failed(Stage::HalfClose, peer, e));
        }

        let drained = self.drain(&socket, peer)?;
        Ok(Delivery::Completed { drained })
    }

    fn drain(&mut self, mut socket: &Socket, peer: SocketAddr) -> Result<u64, DriverError> {
        let mut drained = 0u64;
        loop {
            match socket.read(&mut self.drain_buf) {
                Ok(0) => return Ok(drained),
                Ok(n) => drained += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if peer_gone(&e) => {
                    debug!("{peer} reset the connection after {drained} response bytes");
                    return Ok(drained);
                }
                Err(e) => return Err(stage_failed(Stage::Drain, peer, e)),
            }
        }
    }
}

/// Finishes a blocking `connect` that a signal interrupted.
///
/// The kernel keeps the handshake going, and reissuing `connect` would only
/// report EALREADY, so wait for writability and read the outcome from
/// `SO_ERROR` instead.
#[cfg(unix)]
fn await_connect(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let mut pollfd = libc::pollfd {
        fd: socket.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        // SAFETY: `pollfd` is a valid, exclusively borrowed array of one entry.
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc >= 0 {
            break;
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e);
        }
    }
    match socket.take_error()? {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn await_connect(_socket: &Socket) -> io::Result<()> {
    Err(io::ErrorKind::Interrupted.into())
}

fn send_all(socket: &Socket, mut input: &[u8]) -> io::Result<()> {
    while !input.is_empty() {
        match socket.send_with_flags(input, SEND_FLAGS) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => input = &input[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// One-shot delivery with default settings.
pub fn deliver_input(port: u16, input: &[u8]) -> Result<Delivery, DriverError> {
    ConnectionDriver::new(port).deliver(input).inspect_err(|e| {
        warn!(
            "Net driver (pid={}): delivery to port {port} failed: {e}",
            std::process::id()
        )
    })
}
