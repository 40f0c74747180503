pub mod args;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod integration;
pub mod isolation;
pub mod launcher;
pub mod port;
pub mod readiness;

pub use args::{SplitArgs, engine_args, split_at_separator};
pub use config::{DriverConfig, DriverSettings};
pub use connection::{ConnectionDriver, Delivery, deliver_input};
pub use driver::{NetDriver, exit_on_fatal};
pub use error::{DriverError, Stage};
pub use integration::ServerIntegration;
pub use isolation::{IsolationOutcome, ensure_isolated};
pub use launcher::{ServerExit, ServerHandle, start_server_async};
pub use port::{TCP_PORT_ENV, resolve_port};
pub use readiness::wait_until_ready;
