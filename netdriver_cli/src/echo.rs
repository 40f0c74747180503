use log::{debug, error, info};
use netdriver_core::{DriverError, ServerIntegration};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

/// A tiny server-under-test: reads each connection to EOF and writes it back.
///
/// Understands one flag after `--`: `--reverse` echoes the bytes backwards.
pub struct EchoServer {
    port: u16,
}

impl EchoServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    fn handle(stream: &mut TcpStream, reverse: bool) -> io::Result<usize> {
        let mut request = Vec::new();
        stream.read_to_end(&mut request)?;
        if reverse {
            request.reverse();
        }
        stream.write_all(&request)?;
        Ok(request.len())
    }
}

impl ServerIntegration for EchoServer {
    fn server_main(&mut self, argv: Vec<String>) -> i32 {
        let reverse = argv.iter().any(|a| a == "--reverse");
        if let Some(unknown) = argv.iter().find(|a| a.as_str() != "--reverse") {
            error!("echo server: unknown argument '{unknown}'");
            return 2;
        }

        let listener = match TcpListener::bind(("127.0.0.1", self.port)) {
            Ok(listener) => listener,
            Err(e) => {
                error!("echo server: couldn't bind 127.0.0.1:{}: {e}", self.port);
                return 1;
            }
        };
        info!("echo server listening on 127.0.0.1:{} (reverse: {reverse})", self.port);

        for stream in listener.incoming() {
            match stream {
                Ok(mut stream) => match Self::handle(&mut stream, reverse) {
                    Ok(n) => debug!("echo server: answered {n} bytes"),
                    Err(e) => debug!("echo server: connection ended early: {e}"),
                },
                Err(e) => debug!("echo server: accept failed: {e}"),
            }
        }
        0
    }

    fn tcp_port(&self, _args: &[String], _default: u16) -> Result<u16, DriverError> {
        Ok(self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Shutdown;
    use std::thread;

    #[test]
    fn reverse_flag_reverses_the_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            EchoServer::handle(&mut stream, true).unwrap()
        });

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(b"abc").unwrap();
        client.shutdown(Shutdown::Write).unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();

        assert_eq!(reply, b"cba");
        assert_eq!(server.join().unwrap(), 3);
    }

    #[test]
    fn unknown_arguments_fail_fast() {
        let mut server = EchoServer::new(0);
        assert_eq!(server.server_main(vec!["--bogus".to_string()]), 2);
    }

    #[test]
    fn port_hook_reports_the_configured_port() {
        let server = EchoServer::new(9090);
        assert_eq!(server.tcp_port(&[], 8080).unwrap(), 9090);
    }
}
