use crate::connection::ConnectionDriver;
use crate::error::DriverError;
use crate::launcher::ServerHandle;
use log::info;
use std::thread;
use std::time::Duration;

/// Blocks until something accepts TCP connections on `port`.
///
/// Probes forever with a fixed `interval` between attempts. There is no
/// timeout: without a listening server there is nothing to fuzz, and an
/// operator can always kill the process. When `server` is given, a server that
/// already exited ends the wait with [`DriverError::ServerExited`].
pub fn wait_until_ready(
    port: u16,
    interval: Duration,
    server: Option<&ServerHandle>,
) -> Result<u32, DriverError> {
    let prober = ConnectionDriver::new(port);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match prober.connect() {
            Ok((probe, addr)) => {
                drop(probe);
                info!(
                    "Net driver (pid={}): the TCP server accepts connections at {}. TCP fuzzing starts now!",
                    std::process::id(),
                    addr
                );
                return Ok(attempts);
            }
            Err(DriverError::Connect { .. }) => {}
            Err(e) => return Err(e),
        }

        if let Some(exit) = server.and_then(ServerHandle::try_exit) {
            return Err(DriverError::ServerExited(exit.exit_code()));
        }

        info!(
            "Net driver (pid={}): waiting for the TCP server to start accepting connections at 127.0.0.1:{} ...",
            std::process::id(),
            port
        );
        thread::sleep(interval);
    }
}
