use crate::config::{DriverConfig, DriverSettings};
use crate::connection::{ConnectionDriver, Delivery};
use crate::error::DriverError;
use crate::integration::ServerIntegration;
use crate::isolation::ensure_isolated;
use crate::launcher::{ServerExit, start_server_async};
use crate::readiness::wait_until_ready;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The engine-facing side of the net driver.
///
/// [`NetDriver::initialize`] is the one-time setup the fuzzing engine runs
/// before its first iteration; [`NetDriver::test_one_input`] is the
/// per-iteration call.
#[derive(Debug)]
pub struct NetDriver {
    config: DriverConfig,
    engine_args: Vec<String>,
    connection: ConnectionDriver,
}

impl NetDriver {
    /// Sets up the session: port, argument split, isolation, server launch and
    /// the readiness wait. The process exits when the server returns.
    pub fn initialize<S>(
        args: Vec<String>,
        integration: S,
        settings: &DriverSettings,
    ) -> Result<Self, DriverError>
    where
        S: ServerIntegration,
    {
        Self::initialize_with(args, integration, settings, |exit| {
            error!(
                "Net driver (pid={}): the TCP server {}, no further fuzzing is possible",
                std::process::id(),
                exit
            );
            std::process::exit(exit.exit_code());
        })
    }

    /// Like [`NetDriver::initialize`], with a custom reaction to the server
    /// finishing after startup.
    pub fn initialize_with<S, F>(
        args: Vec<String>,
        integration: S,
        settings: &DriverSettings,
        on_server_exit: F,
    ) -> Result<Self, DriverError>
    where
        S: ServerIntegration,
        F: FnOnce(ServerExit) + Send + 'static,
    {
        if INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(DriverError::AlreadyInitialized);
        }

        let tcp_port = integration.tcp_port(&args, settings.default_port)?;
        let split = integration.split_args(args);
        let config = DriverConfig {
            tcp_port,
            server_argv: split.server,
        };
        info!(
            "Net driver (pid={}): TCP port:{} will be used",
            std::process::id(),
            tcp_port
        );

        let isolation = ensure_isolated(settings)?;
        debug!("Isolation: {isolation:?}");

        let server = start_server_async(&config, settings.server_stack_size, integration)?;
        wait_until_ready(tcp_port, settings.readiness_interval(), Some(&server))?;
        server
            .supervise(on_server_exit)
            .map_err(DriverError::Spawn)?;

        Ok(Self {
            connection: ConnectionDriver::from_settings(tcp_port, settings),
            config,
            engine_args: split.engine,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The arguments left for the fuzzing engine's own flag parser.
    pub fn engine_args(&self) -> &[String] {
        &self.engine_args
    }

    /// A separate connection driver for an additional engine worker thread.
    pub fn connection_driver(&self) -> ConnectionDriver {
        self.connection.clone()
    }

    pub fn test_one_input(&mut self, data: &[u8]) -> Result<Delivery, DriverError> {
        self.connection.deliver(data)
    }
}

/// Logs a fatal error and exits with its exit code.
pub fn exit_on_fatal<T>(result: Result<T, DriverError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("Net driver (pid={}): {}", std::process::id(), e);
            std::process::exit(e.exit_code());
        }
    }
}
