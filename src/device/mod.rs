//! Device collaborator boundary.
//!
//! The session does not know how to read a sensor or drive an LED. It asks a
//! [`Device`] for one [`TelemetrySample`] per publish cycle, hands it parsed
//! [`Command`]s received on the command topic, and reports link status so the
//! board can show it on an indicator.
//!
//! All calls happen synchronously on the thread that drives the session.
//!
//! ```rust
//! use mqtt_node::device::Command;
//!
//! assert_eq!(Command::parse(b"led_on"), Command::LedOn);
//! assert_eq!(Command::parse(b"led_off"), Command::LedOff);
//! assert!(matches!(Command::parse(b"reboot"), Command::Unknown(_)));
//! ```

use heapless::String;
use serde::{Deserialize, Serialize};

/// Maximum length of a telemetry unit label.
pub const MAX_UNIT_LEN: usize = 16;
/// Maximum number of bytes kept from an unrecognised command.
pub const MAX_COMMAND_LEN: usize = 32;

/// One sensor reading, produced right before it is published.
///
/// Serialises to compact JSON, e.g. `{"unit":"Celsius","value":23.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Unit label of the reading.
    pub unit: String<MAX_UNIT_LEN>,
    /// The reading itself.
    pub value: f32,
}

impl TelemetrySample {
    /// Build a sample, truncating `unit` to [`MAX_UNIT_LEN`] bytes on a
    /// character boundary.
    pub fn new(unit: &str, value: f32) -> Self {
        Self {
            unit: truncated(unit),
            value,
        }
    }
}

/// The command vocabulary understood on the command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Switch the user LED on (`"led_on"`).
    LedOn,
    /// Switch the user LED off (`"led_off"`).
    LedOff,
    /// Anything else, kept for logging.
    Unknown(String<MAX_COMMAND_LEN>),
}

impl Command {
    /// Parse a raw command payload with an exact, case-sensitive match.
    ///
    /// Payloads that are not valid UTF-8 become `Unknown` holding the longest
    /// valid prefix.
    pub fn parse(raw: &[u8]) -> Self {
        let text = match core::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or_default(),
        };
        match raw {
            b"led_on" => Command::LedOn,
            b"led_off" => Command::LedOff,
            _ => Command::Unknown(truncated(text)),
        }
    }

    /// The wire name of a known command.
    pub fn name(&self) -> &str {
        match self {
            Command::LedOn => "led_on",
            Command::LedOff => "led_off",
            Command::Unknown(name) => name.as_str(),
        }
    }
}

/// Side-channel indicators the device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum StatusKind {
    /// Broker link status (on while the session is connected).
    Network,
}

/// Sensors, actuators and indicators of the board running the node.
pub trait Device {
    /// Error reported by a failed sensor read.
    type Error: core::fmt::Debug;

    /// Whether the peripherals the node relies on are ready.
    fn ready(&mut self) -> bool {
        true
    }

    /// Take a fresh reading.
    fn read_telemetry(&mut self) -> Result<TelemetrySample, Self::Error>;

    /// Carry out a known command. Fire-and-forget.
    fn execute_command(&mut self, command: &Command);

    /// Best-effort status signal, e.g. a link LED.
    fn set_status(&mut self, kind: StatusKind, on: bool);
}

fn truncated<const N: usize>(text: &str) -> String<N> {
    let mut end = text.len().min(N);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    String::try_from(&text[..end]).unwrap_or_default()
}
