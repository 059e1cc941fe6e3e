//! A network abstraction layer for embedded systems
//!
//! The MQTT session never touches sockets directly. It opens connections
//! through a [`Connect`] implementation and talks to them through the
//! [`Read`], [`Write`], [`Poll`] and [`Close`] traits, so the same core runs
//! over an embedded TCP/IP stack, a TLS socket offloaded to a modem, or
//! `std::net` on a host.
//!

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Application layer protocols
pub mod application;

/// Plain TCP transport on top of `std::net`
#[cfg(feature = "std")]
pub mod tcp;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Poll, Read, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection.
    ///
    /// Returning `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// Outcome of a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one byte (or end-of-stream) can be read without blocking.
    Readable,
    /// The timeout elapsed with nothing to read.
    TimedOut,
}

/// Blocking readiness wait on a connection.
pub trait Poll {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Block until the connection is readable or `timeout_ms` elapses.
    ///
    /// A timeout of zero must not block; it only reports data that is
    /// already pending.
    fn poll_readable(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close + Poll {}

/// Channel security requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security<'a> {
    /// Unencrypted TCP.
    Plain,
    /// TLS with a single trust anchor.
    Tls {
        /// DER-encoded CA certificate the server chain must lead to.
        trust_anchor: &'a [u8],
        /// Whether the server certificate must match [`Endpoint::host`].
        verify_hostname: bool,
        /// Whether the host name is sent as SNI.
        server_name_indication: bool,
    },
}

/// Where and how to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    /// Broker host name or address literal.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// Channel security.
    pub security: Security<'a>,
}

impl Endpoint<'_> {
    /// `true` when the endpoint asks for TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self.security, Security::Tls { .. })
    }
}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Resolve `remote` and open a connection to it
    fn connect(&mut self, remote: &Endpoint<'_>) -> Result<Self::Connection, Self::Error>;
}
