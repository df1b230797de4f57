//! Byte stream to a single peer
//!
//! The session only needs `Read + Write` plus a read timeout and a way to
//! hang up, so tests can substitute an in-memory stream.

use crate::error::{Result, WalletError};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// A connected, ordered byte stream
pub trait Transport: Read + Write {
    /// Bound the next blocking read; `None` waits forever
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    fn close(&mut self);
}

/// Opens transports; each call yields a fresh connection
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, host: &str, port: u16) -> Result<Self::Transport>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        // a zero timeout is rejected by the OS
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        TcpStream::set_read_timeout(self, timeout)?;
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Plain TCP with a bounded connect time
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for TcpConnector {
    type Transport = TcpStream;

    fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| WalletError::Connection(format!("cannot resolve {host}: {e}")))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            debug!("connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(WalletError::Connection(match last_error {
            Some(e) => format!("cannot connect to {host}:{port}: {e}"),
            None => format!("{host} did not resolve to any address"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let mut stream = TcpConnector::default().connect("127.0.0.1", port).unwrap();
        Transport::set_read_timeout(&mut stream, Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"ping").unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"ping");
        stream.close();
        server.join().unwrap();
    }

    #[test]
    fn test_refused_connection() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let result = TcpConnector::new(Duration::from_secs(2)).connect("127.0.0.1", port);
        assert!(matches!(result, Err(WalletError::Connection(_))));
    }
}
