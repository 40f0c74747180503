use crate::args::{SplitArgs, split_at_separator};
use crate::error::DriverError;
use crate::port::resolve_port;

/// What a server-under-test plugs into the net driver.
///
/// Only [`ServerIntegration::server_main`] is required. The port and argument
/// hooks default to the `_HF_TCP_PORT` environment variable and the `--`
/// separator convention.
pub trait ServerIntegration: Send + 'static {
    /// Runs the server: bind the resolved port and serve until done.
    ///
    /// Runs on its own thread. Returning ends the fuzzing session, and the
    /// process exits with the returned code.
    fn server_main(&mut self, argv: Vec<String>) -> i32;

    /// Chooses the TCP port inputs are sent to.
    fn tcp_port(&self, _args: &[String], default: u16) -> Result<u16, DriverError> {
        resolve_port(default)
    }

    /// Divides the command line between the fuzzing engine and the server.
    fn split_args(&self, args: Vec<String>) -> SplitArgs {
        split_at_separator(args)
    }
}

impl<F> ServerIntegration for F
where
    F: FnMut(Vec<String>) -> i32 + Send + 'static,
{
    fn server_main(&mut self, argv: Vec<String>) -> i32 {
        self(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPortServer;

    impl ServerIntegration for FixedPortServer {
        fn server_main(&mut self, _argv: Vec<String>) -> i32 {
            0
        }

        fn tcp_port(&self, _args: &[String], _default: u16) -> Result<u16, DriverError> {
            Ok(4444)
        }

        fn split_args(&self, args: Vec<String>) -> SplitArgs {
            SplitArgs {
                engine: args[..1].to_vec(),
                server: args[1..].to_vec(),
            }
        }
    }

    #[test]
    fn closures_are_integrations() {
        let mut server = |argv: Vec<String>| argv.len() as i32;
        assert_eq!(server.server_main(vec!["a".into(), "b".into()]), 2);
        let split = server.split_args(vec!["prog".into(), "--".into(), "x".into()]);
        assert_eq!(split.server, vec!["x".to_string()]);
    }

    #[test]
    fn hooks_can_be_overridden() {
        let server = FixedPortServer;
        assert_eq!(server.tcp_port(&[], 8080).unwrap(), 4444);
        let split = server.split_args(vec!["prog".into(), "-x".into(), "--".into()]);
        assert_eq!(split.engine, vec!["prog".to_string()]);
        assert_eq!(split.server, vec!["-x".to_string(), "--".to_string()]);
    }
}
