//! # Application Layer Network Protocols
//!
//! Application layer (OSI Layer 7) protocols built on the core network
//! traits. Every client here is connection agnostic: it works with any type
//! implementing [`Connection`](crate::network::Connection) and keeps its
//! buffers in fixed-size storage.
//!
//! - **[`mqtt`]**: MQTT 3.1.1 persistent-session client with QoS 0/1/2,
//!   keepalive, reconnect and a telemetry/command topic router.

/// MQTT client implementation.
///
/// Provides an MQTT 3.1.1 session controller for lightweight publish-subscribe
/// messaging, commonly used in IoT applications.
pub mod mqtt;
