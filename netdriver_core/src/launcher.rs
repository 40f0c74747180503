use crate::config::DriverConfig;
use crate::error::{DriverError, EXIT_FAILURE};
use crate::integration::ServerIntegration;
use log::{debug, info};
use std::any::Any;
use std::cell::OnceCell;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

const SERVER_THREAD_NAME: &str = "netdriver-server";
const WATCHDOG_THREAD_NAME: &str = "netdriver-watchdog";

/// How the server entry point finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerExit {
    Returned(i32),
    Panicked(String),
}

impl ServerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerExit::Returned(code) => *code,
            ServerExit::Panicked(_) => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for ServerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerExit::Returned(code) => write!(f, "returned {code}"),
            ServerExit::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// The running server-under-test.
///
/// The server thread itself is detached; this handle only carries its
/// completion signal.
#[derive(Debug)]
pub struct ServerHandle {
    exit_rx: Receiver<ServerExit>,
    exit: OnceCell<ServerExit>,
}

impl ServerHandle {
    /// Non-blocking check for server termination.
    pub fn try_exit(&self) -> Option<&ServerExit> {
        if self.exit.get().is_none() {
            let observed = match self.exit_rx.try_recv() {
                Ok(exit) => exit,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => vanished(),
            };
            let _ = self.exit.set(observed);
        }
        self.exit.get()
    }

    /// Blocks until the server entry point finishes.
    pub fn wait(self) -> ServerExit {
        if let Some(exit) = self.exit.into_inner() {
            return exit;
        }
        self.exit_rx.recv().unwrap_or_else(|_| vanished())
    }

    /// Hands the completion signal to a watchdog thread that calls `on_exit`
    /// once the server finishes.
    pub fn supervise<F>(self, on_exit: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(ServerExit) + Send + 'static,
    {
        thread::Builder::new()
            .name(WATCHDOG_THREAD_NAME.to_string())
            .spawn(move || on_exit(self.wait()))
    }
}

fn vanished() -> ServerExit {
    ServerExit::Panicked("server thread ended without reporting".to_string())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Starts `server` on its own thread with `config.server_argv`.
///
/// The call returns as soon as the thread exists; it does not wait for the
/// server to bind its port (see [`crate::readiness`]).
pub fn start_server_async<S>(
    config: &DriverConfig,
    stack_size: usize,
    mut server: S,
) -> Result<ServerHandle, DriverError>
where
    S: ServerIntegration,
{
    let (exit_tx, exit_rx) = mpsc::channel();
    let argv = config.server_argv.clone();
    debug!("Starting server thread with argv {argv:?}, stack size {stack_size}");

    thread::Builder::new()
        .name(SERVER_THREAD_NAME.to_string())
        .stack_size(stack_size)
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(move || server.server_main(argv)));
            let exit = match outcome {
                Ok(code) => ServerExit::Returned(code),
                Err(payload) => ServerExit::Panicked(panic_message(payload)),
            };
            info!(
                "Net driver (pid={}): server_main() {}",
                std::process::id(),
                exit
            );
            let _ = exit_tx.send(exit);
        })
        .map_err(DriverError::Spawn)?;

    Ok(ServerHandle {
        exit_rx,
        exit: OnceCell::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn config(argv: &[&str]) -> DriverConfig {
        DriverConfig {
            tcp_port: 8080,
            server_argv: argv.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn server_receives_argv_and_exit_code_is_observed() {
        let handle = start_server_async(
            &config(&["--conf", "/etc/app.conf"]),
            1 << 20,
            |argv: Vec<String>| {
                assert_eq!(argv, vec!["--conf".to_string(), "/etc/app.conf".to_string()]);
                7
            },
        )
        .unwrap();
        assert_eq!(handle.wait(), ServerExit::Returned(7));
    }

    #[test]
    fn server_panic_is_observed_as_failure() {
        let handle = start_server_async(&config(&[]), 1 << 20, |_argv: Vec<String>| -> i32 {
            panic!("Boom!")
        })
        .unwrap();
        let exit = handle.wait();
        match &exit {
            ServerExit::Panicked(msg) => assert!(msg.contains("Boom!")),
            _ => panic!("Expected a panic, got {exit:?}"),
        }
        assert_eq!(exit.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn try_exit_is_empty_while_server_runs() {
        let (release_tx, release_rx) = channel::<()>();
        let handle = start_server_async(&config(&[]), 1 << 20, move |_argv: Vec<String>| {
            let _ = release_rx.recv();
            3
        })
        .unwrap();

        assert!(handle.try_exit().is_none());
        release_tx.send(()).unwrap();

        let mut observed = None;
        for _ in 0..500 {
            if let Some(exit) = handle.try_exit() {
                observed = Some(exit.clone());
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(observed, Some(ServerExit::Returned(3)));
        assert_eq!(handle.try_exit(), Some(&ServerExit::Returned(3)));
        assert_eq!(handle.wait(), ServerExit::Returned(3));
    }

    #[test]
    fn deep_recursion_fits_in_the_server_stack() {
        fn depth(n: u32) -> u32 {
            let pad = std::hint::black_box([0u8; 1024]);
            if n == 0 {
                0
            } else {
                depth(n - 1) + pad[n as usize % 1024] as u32
            }
        }
        let handle = start_server_async(
            &config(&[]),
            crate::config::default_server_stack_size(),
            |_argv: Vec<String>| depth(2048) as i32,
        )
        .unwrap();
        assert_eq!(handle.wait(), ServerExit::Returned(0));
    }

    #[test]
    fn watchdog_applies_exit_policy() {
        let (seen_tx, seen_rx) = channel();
        let handle = start_server_async(&config(&[]), 1 << 20, |_argv: Vec<String>| 9).unwrap();
        let watchdog = handle
            .supervise(move |exit| {
                seen_tx.send(exit.exit_code()).unwrap();
            })
            .unwrap();
        watchdog.join().unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 9);
    }
}
