//! MQTT 3.1.1 protocol implementation for embedded systems.
//!
//! This module provides a persistent-session MQTT 3.1.1 client designed for
//! `no_std` environments and devices on an unreliable link. MQTT (Message
//! Queuing Telemetry Transport) is a lightweight publish-subscribe messaging
//! protocol ideal for IoT applications.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Session ────────────────────────────┐
//! │                                                                 │
//! │  Multiplexer ──▶ RxBuffer ──▶ Codec ──▶ AckTracker (acks)       │
//! │      ▲                          │  └──▶ TopicRouter ──▶ Device   │
//! │      │                          ▼                               │
//! │  keepalive / publish timers ──▶ Codec ──▶ Transport              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`codec`]: control packet encoding/decoding over caller-owned buffers.
//! - [`buffer`]: resumable receive accumulation.
//! - [`tracker`]: QoS 1 / QoS 2 acknowledgment phases and message ids.
//! - [`mux`]: one bounded blocking wait per loop iteration.
//! - [`router`]: command topic dispatch and telemetry payload production.
//! - [`session`]: the connection state machine that drives all of the above.
//! - [`config`]: broker, topics, timing and TLS settings.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_node::network::application::mqtt::{ClientId, Config, Session};
//! # use mqtt_node::device::{Command, Device, StatusKind, TelemetrySample};
//! # use mqtt_node::network::{Close, Connect, Connection, Endpoint, Poll, Read, Readiness, Write};
//! # use mqtt_node::time::Clock;
//! # struct Net;
//! # struct Conn;
//! # impl Read for Conn { type Error = (); fn read(&mut self, _: &mut [u8]) -> Result<usize, ()> { Ok(0) } }
//! # impl Write for Conn {
//! #     type Error = ();
//! #     fn write(&mut self, b: &[u8]) -> Result<usize, ()> { Ok(b.len()) }
//! #     fn flush(&mut self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl Close for Conn { type Error = (); fn close(self) -> Result<(), ()> { Ok(()) } }
//! # impl Poll for Conn { type Error = (); fn poll_readable(&mut self, _: u32) -> Result<Readiness, ()> { Ok(Readiness::TimedOut) } }
//! # impl Connection for Conn {}
//! # impl Connect for Net {
//! #     type Connection = Conn;
//! #     type Error = ();
//! #     fn connect(&mut self, _: &Endpoint<'_>) -> Result<Conn, ()> { Ok(Conn) }
//! # }
//! # struct Board;
//! # impl Device for Board {
//! #     type Error = ();
//! #     fn read_telemetry(&mut self) -> Result<TelemetrySample, ()> { Ok(TelemetrySample::new("Celsius", 21.0)) }
//! #     fn execute_command(&mut self, _: &Command) {}
//! #     fn set_status(&mut self, _: StatusKind, _: bool) {}
//! # }
//! # struct Ticks;
//! # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } fn delay_ms(&mut self, _: u32) {} }
//!
//! let config = Config::new("broker.example.com", "devices/node-1/telemetry", "devices/node-1/cmd");
//! let client_id = ClientId::from_entropy("node", b"\x01\x02\x03\x04").unwrap();
//! let mut session: Session<'_, _, _, _> = Session::new(Net, Board, Ticks, config, client_id).unwrap();
//!
//! // Connects, subscribes, publishes telemetry and reconnects forever.
//! session.run();
//! ```

pub mod buffer;
pub mod client_id;
pub mod codec;
pub mod config;
pub mod mux;
pub mod router;
pub mod session;
pub mod tracker;

pub use client_id::ClientId;
pub use codec::{Decoded, Packet, Publish};
pub use config::{Config, TlsSettings};
pub use session::{Session, State};
pub use tracker::{AckTracker, Phase};

use crate::network::error::Error as NetworkError;
use serde::Deserialize;

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the guarantee of delivery for a specific message. Higher QoS levels
/// provide stronger delivery guarantees but require more network overhead and
/// client state management.
///
/// # Examples
///
/// ```rust
/// use mqtt_node::network::application::mqtt::QoS;
///
/// let qos0 = QoS::AtMostOnce;   // Fire and forget
/// let qos1 = QoS::AtLeastOnce;  // Acknowledged delivery
/// let qos2 = QoS::ExactlyOnce;  // Assured delivery
///
/// assert_eq!(qos0 as u8, 0);
/// assert_eq!(qos1 as u8, 1);
/// assert_eq!(qos2 as u8, 2);
/// assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(try_from = "u8")]
pub enum QoS {
    /// **QoS 0**: At most once delivery.
    ///
    /// Messages are delivered according to the best effort of the underlying network.
    /// Message loss can occur.
    AtMostOnce = 0,

    /// **QoS 1**: At least once delivery.
    ///
    /// Messages are assured to arrive but duplicates can occur.
    AtLeastOnce = 1,

    /// **QoS 2**: Exactly once delivery.
    ///
    /// Messages are assured to arrive exactly once through a four-way
    /// PUBLISH / PUBREC / PUBREL / PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl QoS {
    /// Decode the two QoS bits used in PUBLISH headers and SUBSCRIBE payloads.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// A QoS value outside `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidQoS(pub u8);

impl core::fmt::Display for InvalidQoS {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "invalid QoS level {}", self.0)
    }
}

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        QoS::from_bits(value).ok_or(InvalidQoS(value))
    }
}

/// Errors reported by the MQTT [`Session`].
///
/// Only variants that end or prevent a connection are returned from the
/// driving loop; protocol oddities such as unmatched acknowledgments are
/// logged and absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The transport failed; the session is now disconnected.
    Network(NetworkError),
    /// The broker answered CONNECT with a non-zero return code.
    Refused(codec::ConnectReturnCode),
    /// No CONNACK arrived within the handshake window.
    HandshakeTimeout,
    /// A PINGREQ went unanswered for a whole keepalive interval.
    KeepaliveTimeout,
    /// The operation needs a connected session.
    NotConnected,
    /// A packet did not fit the transmit buffer.
    Encode(codec::EncodeError),
    /// Every in-flight slot is taken.
    InFlightFull,
    /// The configuration was rejected.
    Config(config::ConfigError),
    /// The device reported that its peripherals are not ready.
    DeviceNotReady,
    /// A telemetry cycle was skipped.
    Telemetry(router::RouterError),
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::Network(e)
    }
}

impl From<codec::EncodeError> for Error {
    fn from(e: codec::EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<tracker::TrackError> for Error {
    fn from(e: tracker::TrackError) -> Self {
        match e {
            tracker::TrackError::InFlightFull => Error::InFlightFull,
            tracker::TrackError::PayloadTooLarge | tracker::TrackError::NotAcknowledged => {
                Error::Encode(codec::EncodeError::Overflow)
            }
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e)
    }
}
