use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Exit code used for every fatal condition that does not carry its own code.
pub const EXIT_FAILURE: i32 = 1;

/// The step of a single delivery a connection error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    SendBufferHint,
    Write,
    HalfClose,
    Drain,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::SendBufferHint => "setsockopt(SO_SNDBUF)",
            Stage::Write => "send",
            Stage::HalfClose => "shutdown(SHUT_WR)",
            Stage::Drain => "recv",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("not a number")]
    NotANumber,
    #[error("{0} cannot be < 1")]
    TooSmall(i64),
    #[error("{0} cannot be > 65535")]
    TooLarge(i64),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Specified TCP port '{var}'='{value}' is invalid: {reason}")]
    InvalidPort {
        var: &'static str,
        value: String,
        reason: PortError,
    },
    #[error("Isolation step '{step}' failed: {source}")]
    Isolation {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Couldn't create the server thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("The server entry point exited with code {0}")]
    ServerExited(i32),
    #[error("Couldn't connect to the server at loopback port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("{stage} on connection to {peer} failed: {source}")]
    Io {
        stage: Stage,
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("{stage} on connection to {peer} timed out")]
    Timeout { stage: Stage, peer: SocketAddr },
    #[error("The net driver was already initialized in this process")]
    AlreadyInitialized,
}

impl DriverError {
    /// The process exit code the top level uses when this error is fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::ServerExited(code) => *code,
            _ => EXIT_FAILURE,
        }
    }
}
