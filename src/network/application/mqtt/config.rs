//! Session configuration.
//!
//! A [`Config`] borrows all of its strings, so it can point into flash
//! constants or into a JSON document parsed with [`Config::from_json`]:
//!
//! ```rust
//! use mqtt_node::network::application::mqtt::{Config, QoS};
//!
//! let json = r#"{
//!     "broker_host": "192.168.1.10",
//!     "publish_topic": "sensors/node-1",
//!     "command_topic": "sensors/node-1/cmd",
//!     "qos": 2
//! }"#;
//! let config = Config::from_json(json).unwrap();
//! assert_eq!(config.broker_port, 1883);
//! assert_eq!(config.qos, QoS::ExactlyOnce);
//! ```

use super::QoS;
use crate::network::{Endpoint, Security};
use base64ct::{Base64, Encoding};
use serde::Deserialize;

/// Default plain MQTT port.
pub const DEFAULT_PORT: u16 = 1883;
/// Default keepalive interval.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
/// Default telemetry period.
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u32 = 10;
/// Default maximum telemetry payload.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 128;
/// Default CONNACK wait.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u32 = 1000;
/// Default pause between connection attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u32 = 1000;

/// Longest topic a UTF-8 string field can carry.
const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse,
    /// The broker host is empty.
    EmptyHost,
    /// The broker port is 0.
    InvalidPort,
    /// A topic is empty, too long, or contains a wildcard.
    InvalidTopic,
    /// The payload limit is 0 or larger than the session buffers.
    InvalidPayloadLimit,
    /// The publish interval is 0.
    InvalidInterval,
    /// The CA certificate is not a PEM certificate.
    InvalidCertificate,
    /// The decoded CA certificate does not fit its buffer.
    CertificateTooLarge,
}

/// TLS parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TlsSettings<'a> {
    /// PEM-armoured CA certificate the broker chain must lead to.
    pub ca_cert_pem: &'a str,
    /// Check the broker certificate against the host name.
    #[serde(default = "enabled")]
    pub verify_hostname: bool,
    /// Send the host name as SNI.
    #[serde(default = "enabled")]
    pub server_name_indication: bool,
}

impl<'a> TlsSettings<'a> {
    /// Verified TLS against `ca_cert_pem`.
    pub fn new(ca_cert_pem: &'a str) -> Self {
        Self {
            ca_cert_pem,
            verify_hostname: true,
            server_name_indication: true,
        }
    }

    /// Decode the first PEM certificate into DER, returning its length.
    pub fn trust_anchor_der(&self, out: &mut [u8]) -> Result<usize, ConfigError> {
        const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
        const END: &str = "-----END CERTIFICATE-----";

        let start = self
            .ca_cert_pem
            .find(BEGIN)
            .ok_or(ConfigError::InvalidCertificate)?
            + BEGIN.len();
        let len = self.ca_cert_pem[start..]
            .find(END)
            .ok_or(ConfigError::InvalidCertificate)?;
        let body = &self.ca_cert_pem[start..start + len];

        let mut text = heapless::Vec::<u8, MAX_PEM_BODY>::new();
        for byte in body.bytes().filter(|b| !b.is_ascii_whitespace()) {
            text.push(byte)
                .map_err(|_| ConfigError::CertificateTooLarge)?;
        }
        if text.is_empty() || text.len() % 4 != 0 {
            return Err(ConfigError::InvalidCertificate);
        }

        let padding = text.iter().rev().take_while(|b| **b == b'=').count();
        let decoded_len = text.len() / 4 * 3 - padding.min(2);
        if decoded_len > out.len() {
            return Err(ConfigError::CertificateTooLarge);
        }

        Base64::decode(&text, out)
            .map(|der| der.len())
            .map_err(|_| ConfigError::InvalidCertificate)
    }
}

/// Largest base64 body accepted for a CA certificate.
const MAX_PEM_BODY: usize = 4096;

fn enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_keep_alive() -> u16 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_interval() -> u32 {
    DEFAULT_PUBLISH_INTERVAL_SECS
}

fn default_qos() -> QoS {
    QoS::AtLeastOnce
}

fn default_payload_limit() -> usize {
    DEFAULT_PAYLOAD_LIMIT
}

fn default_connect_timeout() -> u32 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_reconnect_delay() -> u32 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// Broker, topic and timing settings for a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Config<'a> {
    /// Broker host name or address literal.
    pub broker_host: &'a str,
    /// Broker port.
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Topic telemetry is published on.
    pub publish_topic: &'a str,
    /// Topic commands arrive on.
    pub command_topic: &'a str,
    /// Seconds between telemetry publishes.
    #[serde(default = "default_interval")]
    pub publish_interval_secs: u32,
    /// Keepalive interval in seconds; 0 disables keepalive.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// QoS for telemetry and the command subscription.
    #[serde(default = "default_qos")]
    pub qos: QoS,
    /// Maximum serialised telemetry payload in bytes.
    #[serde(default = "default_payload_limit")]
    pub payload_limit: usize,
    /// How long to wait for CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u32,
    /// Pause between connection attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u32,
    /// TLS settings; plain TCP when absent.
    #[serde(default, borrow)]
    pub tls: Option<TlsSettings<'a>>,
}

impl<'a> Config<'a> {
    /// Plain TCP configuration with default port, timing and QoS 1.
    pub fn new(broker_host: &'a str, publish_topic: &'a str, command_topic: &'a str) -> Self {
        Self {
            broker_host,
            broker_port: DEFAULT_PORT,
            publish_topic,
            command_topic,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            qos: QoS::AtLeastOnce,
            payload_limit: DEFAULT_PAYLOAD_LIMIT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            tls: None,
        }
    }

    /// Parse and validate a JSON configuration.
    ///
    /// Strings are borrowed from `json`, so they must not contain escapes.
    pub fn from_json(json: &'a str) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_str::<Config<'a>>(json).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings for values the session cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.broker_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        // Inbound publishes are matched against the command topic by exact
        // comparison, so neither topic may be a wildcard filter.
        for topic in [self.publish_topic, self.command_topic] {
            if topic.is_empty() || topic.len() > MAX_TOPIC_LEN || topic.contains(['+', '#']) {
                return Err(ConfigError::InvalidTopic);
            }
        }
        if self.payload_limit == 0 {
            return Err(ConfigError::InvalidPayloadLimit);
        }
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }

    /// Broker endpoint, with `trust_anchor` as the DER CA when TLS is set.
    pub fn endpoint<'b>(&self, trust_anchor: &'b [u8]) -> Endpoint<'b>
    where
        'a: 'b,
    {
        let security = match self.tls {
            Some(tls) => Security::Tls {
                trust_anchor,
                verify_hostname: tls.verify_hostname,
                server_name_indication: tls.server_name_indication,
            },
            None => Security::Plain,
        };
        Endpoint {
            host: self.broker_host,
            port: self.broker_port,
            security,
        }
    }

    /// Keepalive in milliseconds, `None` when disabled.
    pub fn keep_alive_ms(&self) -> Option<u64> {
        (self.keep_alive_secs > 0).then(|| u64::from(self.keep_alive_secs) * 1000)
    }

    /// Telemetry period in milliseconds.
    pub fn publish_interval_ms(&self) -> u64 {
        u64::from(self.publish_interval_secs) * 1000
    }
}
