//! # mqtt-node - persistent MQTT telemetry node
//!
//! A `no_std` MQTT 3.1.1 client for devices with a single network connection
//! and an unreliable link. It keeps one session with a broker alive,
//! publishes periodic telemetry from the board and dispatches a small command
//! vocabulary received on a subscribed topic.
//!
//! ## Features
//!
//! ### Session
//! - Connect / CONNACK handshake with a bounded wait
//! - Keepalive pings and ping timeout detection
//! - Reconnect with a constant delay after any link loss
//! - QoS 0, 1 and 2 in both directions
//!
//! ### Collaborators
//! - Transport: any type implementing the [`network`] traits
//! - Board: a [`device::Device`] supplying telemetry and executing commands
//! - Time: a [`time::Clock`]
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mqtt-node = "0.1.0"
//! ```
//!
//! ### Host Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "std")]
//! # fn main() {
//! use mqtt_node::network::application::mqtt::{ClientId, Config, Session};
//! use mqtt_node::network::tcp::TcpConnector;
//! use mqtt_node::time::StdClock;
//! # use mqtt_node::device::{Command, Device, StatusKind, TelemetrySample};
//! # struct Board;
//! # impl Device for Board {
//! #     type Error = ();
//! #     fn read_telemetry(&mut self) -> Result<TelemetrySample, ()> { Ok(TelemetrySample::new("Celsius", 21.0)) }
//! #     fn execute_command(&mut self, _: &Command) {}
//! #     fn set_status(&mut self, _: StatusKind, _: bool) {}
//! # }
//!
//! let config = Config::new("localhost", "node/telemetry", "node/cmd");
//! let client_id = ClientId::from_entropy("host", b"serial-0001").unwrap();
//! let mut session: Session<'_, _, _, _> =
//!     Session::new(TcpConnector, Board, StdClock::new(), config, client_id).unwrap();
//! session.run();
//! # }
//! # #[cfg(not(feature = "std"))]
//! # fn main() {}
//! ```
//!
//! ## Platform Support
//!
//! This library is designed to work on:
//! - Embedded microcontrollers (ARM Cortex-M, RISC-V, etc.)
//! - Linux-based IoT devices (Raspberry Pi, etc.)
//! - Any platform supporting Rust's `core` library
//!
//! ## Optional Features
//!
//! - `std`: TCP transport on `std::net` and a `std::time` clock (default: disabled)
//! - `defmt`: log through `defmt` for embedded debugging
//! - `log`: log through the `log` facade

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[macro_use]
mod fmt;

/// Network abstraction layer and the MQTT session built on it.
///
/// Contains the transport traits the session is generic over, their error
/// type, an optional `std` TCP transport and the MQTT protocol stack.
pub mod network;

/// Board collaborator: telemetry, commands and status indicators.
pub mod device;

/// Monotonic clock abstraction used for every deadline.
pub mod time;
