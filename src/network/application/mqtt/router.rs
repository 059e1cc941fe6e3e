//! Topic routing between the broker and the [`Device`].
//!
//! Outbound, the router turns a fresh [`TelemetrySample`] into the JSON
//! payload published on the telemetry topic. Inbound, it matches publishes
//! against the command topic and hands recognised commands to the device.
//!
//! [`TelemetrySample`]: crate::device::TelemetrySample

use super::QoS;
use crate::device::{Command, Device};

/// Why a telemetry payload could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouterError {
    /// The sensor read failed.
    Device,
    /// The serialised sample exceeds the payload limit.
    PayloadTooLarge,
}

/// Where an inbound publish ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The publish carried a command for the device.
    Command(Command),
    /// The publish was not on the command topic.
    Discard,
}

/// Maps topics to their roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicRouter<'a> {
    publish_topic: &'a str,
    command_topic: &'a str,
    qos: QoS,
}

impl<'a> TopicRouter<'a> {
    /// A router publishing on `publish_topic` and listening on
    /// `command_topic`, both at `qos`.
    pub fn new(publish_topic: &'a str, command_topic: &'a str, qos: QoS) -> Self {
        Self {
            publish_topic,
            command_topic,
            qos,
        }
    }

    /// Telemetry topic.
    pub fn publish_topic(&self) -> &'a str {
        self.publish_topic
    }

    /// Command topic.
    pub fn command_topic(&self) -> &'a str {
        self.command_topic
    }

    /// QoS used for telemetry and the command subscription.
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Classify an inbound publish. Topics are compared byte for byte.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Route {
        if topic == self.command_topic {
            Route::Command(Command::parse(payload))
        } else {
            Route::Discard
        }
    }

    /// Route an inbound publish and carry out any known command.
    ///
    /// Unknown commands and foreign topics are logged and dropped.
    pub fn dispatch<D: Device>(&self, device: &mut D, topic: &str, payload: &[u8]) -> Route {
        let route = self.route(topic, payload);
        match &route {
            Route::Command(Command::Unknown(name)) => {
                warn!("unknown command \"{}\" on {}", name.as_str(), topic);
            }
            Route::Command(command) => {
                info!("executing command {}", command.name());
                device.execute_command(command);
            }
            Route::Discard => {
                debug!("discarding {} byte publish on {}", payload.len(), topic);
            }
        }
        route
    }

    /// Read one sample and serialise it into `buf`.
    ///
    /// Returns the payload length. Nothing is produced when the sensor read
    /// fails or the JSON is longer than `limit` bytes.
    pub fn produce_telemetry<D: Device>(
        &self,
        device: &mut D,
        buf: &mut [u8],
        limit: usize,
    ) -> Result<usize, RouterError> {
        let sample = device.read_telemetry().map_err(|_| {
            warn!("sensor read failed");
            RouterError::Device
        })?;

        let limit = limit.min(buf.len());
        let len = serde_json_core::to_slice(&sample, &mut buf[..limit])
            .map_err(|_| RouterError::PayloadTooLarge)?;
        debug!("telemetry {} {}", sample.value, sample.unit.as_str());
        Ok(len)
    }
}
