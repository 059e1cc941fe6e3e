//! Plain TCP transport on top of `std::net`.
//!
//! Intended for running the node on a Linux host or in integration tests
//! against a real broker. TLS needs a platform secure socket and is refused
//! with [`Error::Tls`].

use super::error::Error;
use super::{Close, Connect, Connection, Endpoint, Poll, Read, Readiness, Security, Write};
use std::io::{ErrorKind, Read as StdRead, Write as StdWrite};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Opens [`TcpConnection`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Connection = TcpConnection;
    type Error = Error;

    fn connect(&mut self, remote: &Endpoint<'_>) -> Result<Self::Connection, Self::Error> {
        if let Security::Tls { .. } = remote.security {
            return Err(Error::Tls);
        }
        let stream = TcpStream::connect((remote.host, remote.port)).map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            ErrorKind::TimedOut => Error::Timeout,
            _ => Error::InvalidAddress,
        })?;
        stream.set_nodelay(true).map_err(|_| Error::NotOpen)?;
        Ok(TcpConnection { stream })
    }
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
            _ => Error::ReadError,
        })
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf).map_err(|_| Error::WriteError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::WriteError)
    }
}

impl Poll for TcpConnection {
    type Error = Error;

    fn poll_readable(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error> {
        // A zero read timeout is rejected by std, so the shortest wait is 1 ms.
        let timeout = Duration::from_millis(u64::from(timeout_ms.max(1)));
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::NotOpen)?;
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(_) => Ok(Readiness::Readable),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(Readiness::TimedOut)
            }
            Err(_) => Err(Error::ReadError),
        }
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}

impl Connection for TcpConnection {}
