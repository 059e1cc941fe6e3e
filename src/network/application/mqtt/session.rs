//! The MQTT session controller.
//!
//! [`Session`] owns the transport, the receive and transmit buffers, the
//! acknowledgment tracker and the timers, and drives them from a single
//! thread of control:
//!
//! ```text
//!                 connect()
//! Disconnected ─────────────▶ Connecting ──CONNECT sent──▶ AwaitingConnAck
//!      ▲                                                      │       │
//!      │◀──────────── refused / handshake timeout ────────────┘       │ accepted
//!      │                                                              ▼
//!      │◀──── transport error / EOF / DISCONNECT / ping timeout ── Connected
//!      │                                                              │ disconnect()
//!      └─────────────────────────── Disconnecting ◀──────────────────┘
//! ```
//!
//! Every transition into `Disconnected` goes through one teardown path that
//! abandons in-flight messages, drops buffered bytes and closes the transport
//! before any reconnect attempt can start.

use super::buffer::RxBuffer;
use super::client_id::ClientId;
use super::codec::{
    self, ConnAck, Connect, ConnectReturnCode, DecodeError, Decoded, Packet, Publish, SubAckCode,
    Subscribe,
};
use super::config::{Config, ConfigError};
use super::mux::{Multiplexer, Wake};
use super::router::TopicRouter;
use super::tracker::{AckOutcome, AckTracker};
use super::{Error, QoS};
use crate::device::{Device, StatusKind};
use crate::network::error::Error as NetworkError;
use crate::network::{Close, Read, Write};
use crate::time::Clock;
use heapless::Vec;

/// Largest DER trust anchor a session can hold.
pub const MAX_TRUST_ANCHOR: usize = 2048;

/// Packet id used for the command topic subscription. The subscription is
/// sent right after CONNACK, when no publish can be in flight yet.
const SUBSCRIBE_PACKET_ID: u16 = 5841;

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No transport is open.
    Disconnected,
    /// The transport is being opened.
    Connecting,
    /// CONNECT was sent; waiting for CONNACK.
    AwaitingConnAck,
    /// The broker accepted the session.
    Connected,
    /// DISCONNECT is being sent.
    Disconnecting,
}

/// A decoded packet reduced to what the controller still has to act on once
/// the receive buffer is released. Inbound publishes are routed while their
/// topic and payload are still borrowed, so only the ack obligation remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    ConnAck(ConnAck),
    Publish { qos: QoS, pkid: u16 },
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    SubAck { pkid: u16, code: Option<SubAckCode> },
    PingResp,
    Disconnect,
    Unexpected(&'static str),
}

/// What to do with the front of the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Handle(Inbound, usize),
    Discard(usize),
    Skip(usize),
    Reset,
    Wait,
}

/// A persistent MQTT 3.1.1 session with a single broker.
///
/// `BUF` sizes the receive buffer, the transmit buffer, the payload scratch
/// buffer and each in-flight payload copy. `INFLIGHT` bounds the number of
/// unacknowledged QoS 1/2 messages and must be a power of two.
pub struct Session<'a, N, D, K, const BUF: usize = 512, const INFLIGHT: usize = 4>
where
    N: crate::network::Connect,
    D: Device,
    K: Clock,
{
    network: N,
    connection: Option<N::Connection>,
    device: D,
    clock: K,
    config: Config<'a>,
    client_id: ClientId,
    trust_anchor: Vec<u8, MAX_TRUST_ANCHOR>,
    state: State,
    rx: RxBuffer<BUF>,
    tx: [u8; BUF],
    payload: [u8; BUF],
    tracker: AckTracker<INFLIGHT, BUF>,
    router: TopicRouter<'a>,
    mux: Multiplexer,
    last_sent_ms: u64,
    last_received_ms: u64,
    ping_sent_ms: Option<u64>,
    next_publish_ms: Option<u64>,
    pending_suback: Option<u16>,
}

impl<'a, N, D, K, const BUF: usize, const INFLIGHT: usize> core::fmt::Debug
    for Session<'a, N, D, K, BUF, INFLIGHT>
where
    N: crate::network::Connect,
    D: Device,
    K: Clock,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("broker_host", &self.config.broker_host)
            .field("broker_port", &self.config.broker_port)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

impl<'a, N, D, K, const BUF: usize, const INFLIGHT: usize> Session<'a, N, D, K, BUF, INFLIGHT>
where
    N: crate::network::Connect,
    D: Device,
    K: Clock,
{
    /// Create a disconnected session.
    ///
    /// The configuration is validated and the TLS trust anchor, if any, is
    /// decoded here so that configuration problems surface before the first
    /// connection attempt.
    pub fn new(
        network: N,
        device: D,
        clock: K,
        config: Config<'a>,
        client_id: ClientId,
    ) -> Result<Self, Error> {
        config.validate()?;
        if config.payload_limit > BUF {
            return Err(ConfigError::InvalidPayloadLimit.into());
        }
        // SUBSCRIBE: packet id, one length-prefixed filter, requested QoS
        if codec::frame_len(2 + 2 + config.command_topic.len() + 1) > BUF {
            return Err(ConfigError::InvalidTopic.into());
        }
        // Telemetry PUBLISH: length-prefixed topic, packet id, payload
        if codec::frame_len(2 + config.publish_topic.len() + 2 + config.payload_limit) > BUF {
            return Err(ConfigError::InvalidPayloadLimit.into());
        }

        let mut trust_anchor = Vec::new();
        if let Some(tls) = config.tls {
            trust_anchor
                .resize(MAX_TRUST_ANCHOR, 0)
                .map_err(|_| ConfigError::CertificateTooLarge)?;
            let len = tls.trust_anchor_der(&mut trust_anchor)?;
            trust_anchor.truncate(len);
        }

        Ok(Self {
            network,
            connection: None,
            device,
            clock,
            router: TopicRouter::new(config.publish_topic, config.command_topic, config.qos),
            config,
            client_id,
            trust_anchor,
            state: State::Disconnected,
            rx: RxBuffer::new(),
            tx: [0; BUF],
            payload: [0; BUF],
            tracker: AckTracker::new(),
            mux: Multiplexer::default(),
            last_sent_ms: 0,
            last_received_ms: 0,
            ping_sent_ms: None,
            next_publish_ms: None,
            pending_suback: None,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> State {
        self.state
    }

    /// `true` while the broker has accepted the session.
    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// The identifier sent in CONNECT.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &Config<'a> {
        &self.config
    }

    /// Number of outbound messages awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// The acknowledgment tracker.
    pub fn tracker(&self) -> &AckTracker<INFLIGHT, BUF> {
        &self.tracker
    }

    /// Clock reading when bytes were last received from the broker.
    pub fn last_received_ms(&self) -> u64 {
        self.last_received_ms
    }

    /// The device collaborator.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device collaborator, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Make one connection attempt.
    ///
    /// Opens the transport, sends CONNECT and waits up to
    /// `connect_timeout_ms` for CONNACK. On success the command topic is
    /// subscribed and the telemetry timer armed. Any failure leaves the
    /// session `Disconnected`.
    pub fn connect(&mut self) -> Result<(), Error> {
        match self.state {
            State::Connected => return Ok(()),
            State::Disconnected => {}
            _ => self.teardown(),
        }
        if !self.device.ready() {
            error!("device not ready");
            return Err(Error::DeviceNotReady);
        }

        self.state = State::Connecting;
        info!(
            "connecting to {}:{}",
            self.config.broker_host,
            self.config.broker_port
        );
        let endpoint = self.config.endpoint(&self.trust_anchor);
        let connection = match self.network.connect(&endpoint) {
            Ok(connection) => connection,
            Err(_) => {
                warn!("transport connect failed");
                self.state = State::Disconnected;
                return Err(Error::Network(NetworkError::ConnectionRefused));
            }
        };
        self.connection = Some(connection);
        self.rx.clear();

        let encoded = Packet::Connect(Connect {
            client_id: self.client_id.as_str(),
            keep_alive_secs: self.config.keep_alive_secs,
            clean_session: true,
        })
        .encode(&mut self.tx);
        match encoded {
            Ok(len) => self.transmit(len)?,
            Err(e) => return Err(self.abort(e.into())),
        }
        self.state = State::AwaitingConnAck;

        let deadline = self
            .clock
            .now_ms()
            .saturating_add(u64::from(self.config.connect_timeout_ms));
        loop {
            match self.state {
                State::AwaitingConnAck => {}
                State::Connected => return Ok(()),
                _ => return Err(Error::NotConnected),
            }
            if self.clock.now_ms() >= deadline {
                warn!("no CONNACK within {} ms", self.config.connect_timeout_ms);
                return Err(self.abort(Error::HandshakeTimeout));
            }
            let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
            match self.mux.wait(connection, &self.clock, deadline) {
                Ok(Wake::Readable) => self.receive()?,
                Ok(Wake::TimedOut) => {}
                Err(_) => return Err(self.abort(NetworkError::ReadError.into())),
            }
        }
    }

    /// Call [`connect`](Self::connect) until it succeeds, pausing
    /// `reconnect_delay_ms` between attempts. Returns the number of attempts.
    pub fn connect_with_retry(&mut self) -> u32 {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.connect() {
                Ok(()) => return attempts,
                Err(e) => {
                    warn!("connection attempt {} failed: {:?}", attempts, e);
                    self.clock.delay_ms(self.config.reconnect_delay_ms);
                }
            }
        }
    }

    /// Run one iteration of the session loop.
    ///
    /// Blocks until the broker sends something or the nearest timer is due,
    /// handles whatever arrived, then services keepalive and telemetry.
    /// An `Err` means the session was torn down.
    pub fn poll(&mut self) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }

        let now = self.clock.now_ms();
        let deadline = self
            .mux
            .deadline(now, &[self.keepalive_deadline(), self.next_publish_ms]);
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        match self.mux.wait(connection, &self.clock, deadline) {
            Ok(Wake::Readable) => self.receive()?,
            Ok(Wake::TimedOut) => {}
            Err(_) => return Err(self.abort(NetworkError::ReadError.into())),
        }

        self.service_timers()
    }

    /// Connect, then poll while connected, reconnecting whenever the session
    /// drops. Never returns.
    pub fn run(&mut self) -> ! {
        loop {
            let attempts = self.connect_with_retry();
            debug!("connected after {} attempt(s)", attempts);
            while self.state == State::Connected {
                if let Err(e) = self.poll() {
                    warn!("session ended: {:?}", e);
                }
            }
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns the message id for QoS 1 and 2, `None` for QoS 0.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<Option<u16>, Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let scratch = self
            .payload
            .get_mut(..payload.len())
            .ok_or(Error::Encode(super::codec::EncodeError::Overflow))?;
        scratch.copy_from_slice(payload);
        self.publish_scratch(topic, payload.len(), qos)
    }

    /// Read one telemetry sample from the device and publish it.
    pub fn publish_telemetry(&mut self) -> Result<Option<u16>, Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let len = self
            .router
            .produce_telemetry(&mut self.device, &mut self.payload, self.config.payload_limit)
            .map_err(Error::Telemetry)?;
        let topic = self.router.publish_topic();
        let qos = self.router.qos();
        self.publish_scratch(topic, len, qos)
    }

    /// Send DISCONNECT and close the transport.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        self.state = State::Disconnecting;
        if let Err(e) = self.send(&Packet::Disconnect) {
            debug!("DISCONNECT not delivered: {:?}", e);
        }
        self.teardown();
        info!("disconnected");
        Ok(())
    }

    fn publish_scratch(&mut self, topic: &str, len: usize, qos: QoS) -> Result<Option<u16>, Error> {
        let payload = &self.payload[..len];
        let pkid = match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.tracker.track(qos, payload, self.clock.now_ms())?
            }
        };

        let encoded = Packet::Publish(Publish::new(topic, qos, pkid, payload)).encode(&mut self.tx);
        let frame_len = match encoded {
            Ok(frame_len) => frame_len,
            Err(e) => {
                if pkid != 0 {
                    self.tracker.abandon(pkid);
                }
                return Err(e.into());
            }
        };
        self.transmit(frame_len)?;
        debug!("published {} bytes on {} (id {})", len, topic, pkid);
        Ok((pkid != 0).then_some(pkid))
    }

    fn keepalive_deadline(&self) -> Option<u64> {
        let keep_alive = self.config.keep_alive_ms()?;
        let idle = self.last_sent_ms.saturating_add(keep_alive);
        Some(match self.ping_sent_ms {
            Some(sent) => idle.min(sent.saturating_add(keep_alive)),
            None => idle,
        })
    }

    fn service_timers(&mut self) -> Result<(), Error> {
        let now = self.clock.now_ms();

        if let Some(keep_alive) = self.config.keep_alive_ms() {
            match self.ping_sent_ms {
                Some(sent) if now >= sent.saturating_add(keep_alive) => {
                    warn!("PINGRESP overdue by {} ms", now - sent - keep_alive);
                    return Err(self.abort(Error::KeepaliveTimeout));
                }
                Some(_) => {}
                None if now >= self.last_sent_ms.saturating_add(keep_alive) => {
                    trace!("sending PINGREQ");
                    self.send(&Packet::PingReq)?;
                    self.ping_sent_ms = Some(now);
                }
                None => {}
            }
        }

        if self.next_publish_ms.is_some_and(|due| now >= due) {
            self.next_publish_ms = Some(now.saturating_add(self.config.publish_interval_ms()));
            match self.publish_telemetry() {
                Ok(_) => {}
                Err(e @ (Error::Telemetry(_) | Error::InFlightFull | Error::Encode(_))) => {
                    warn!("telemetry cycle skipped: {:?}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn receive(&mut self) -> Result<(), Error> {
        if self.rx.is_full() {
            // Every complete frame has been consumed, so a full buffer holds
            // a frame head that can never complete.
            warn!("receive buffer full, dropping {} bytes", self.rx.data().len());
            self.rx.clear();
        }

        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let read = connection.read(self.rx.spare_mut());
        let n = match read {
            Ok(0) => {
                info!("broker closed the connection");
                return Err(self.abort(NetworkError::ConnectionClosed.into()));
            }
            Ok(n) => n,
            Err(_) => return Err(self.abort(NetworkError::ReadError.into())),
        };
        self.rx.commit(n);
        self.last_received_ms = self.clock.now_ms();
        trace!("received {} bytes", n);

        self.process_rx()
    }

    fn process_rx(&mut self) -> Result<(), Error> {
        loop {
            let step = match Packet::decode(self.rx.data()) {
                Ok(Decoded::Complete { packet, len }) => Step::Handle(
                    Self::classify(&self.router, &mut self.tracker, &mut self.device, packet),
                    len,
                ),
                Ok(Decoded::Incomplete {
                    frame_len: Some(frame_len),
                }) if frame_len > BUF => Step::Skip(frame_len),
                Ok(Decoded::Incomplete { .. }) => Step::Wait,
                Err(DecodeError::Malformed { len }) => Step::Discard(len),
                Err(DecodeError::InvalidHeader) => Step::Reset,
            };

            match step {
                Step::Handle(inbound, len) => {
                    self.rx.consume(len);
                    self.handle(inbound)?;
                    if self.state == State::Disconnected {
                        return Ok(());
                    }
                }
                Step::Discard(len) => {
                    warn!("discarding malformed {} byte frame", len);
                    self.rx.consume(len);
                }
                Step::Skip(frame_len) => {
                    warn!("skipping {} byte frame larger than the receive buffer", frame_len);
                    self.rx.begin_skip(frame_len);
                    return Ok(());
                }
                Step::Reset => {
                    warn!("invalid fixed header, dropping {} buffered bytes", self.rx.data().len());
                    self.rx.clear();
                    return Ok(());
                }
                Step::Wait => return Ok(()),
            }
        }
    }

    /// Route inbound publishes and reduce the packet to an owned [`Inbound`].
    fn classify(
        router: &TopicRouter<'_>,
        tracker: &mut AckTracker<INFLIGHT, BUF>,
        device: &mut D,
        packet: Packet<'_>,
    ) -> Inbound {
        match packet {
            Packet::ConnAck(ack) => Inbound::ConnAck(ack),
            Packet::Publish(publish) => {
                let fresh = publish.qos != QoS::ExactlyOnce || tracker.on_inbound_qos2(publish.pkid);
                if fresh {
                    router.dispatch(device, publish.topic, publish.payload);
                } else {
                    debug!("duplicate QoS 2 publish {} not routed", publish.pkid);
                }
                Inbound::Publish {
                    qos: publish.qos,
                    pkid: publish.pkid,
                }
            }
            Packet::PubAck(id) => Inbound::PubAck(id),
            Packet::PubRec(id) => Inbound::PubRec(id),
            Packet::PubRel(id) => Inbound::PubRel(id),
            Packet::PubComp(id) => Inbound::PubComp(id),
            Packet::SubAck(ack) => Inbound::SubAck {
                pkid: ack.pkid,
                code: ack.codes.first().copied(),
            },
            Packet::PingResp => Inbound::PingResp,
            Packet::Disconnect => Inbound::Disconnect,
            other => Inbound::Unexpected(other.name()),
        }
    }

    fn handle(&mut self, inbound: Inbound) -> Result<(), Error> {
        match inbound {
            Inbound::ConnAck(ack) => self.on_connack(ack)?,
            Inbound::Publish { qos, pkid } => match qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => self.send(&Packet::PubAck(pkid))?,
                QoS::ExactlyOnce => self.send(&Packet::PubRec(pkid))?,
            },
            Inbound::PubAck(id) => match self.tracker.on_puback(id) {
                AckOutcome::Completed => debug!("message {} acknowledged", id),
                _ => warn!("ignoring PUBACK for unknown message {}", id),
            },
            Inbound::PubRec(id) => match self.tracker.on_pubrec(id) {
                AckOutcome::Release(id) => self.send(&Packet::PubRel(id))?,
                _ => warn!("ignoring PUBREC for unknown message {}", id),
            },
            Inbound::PubComp(id) => match self.tracker.on_pubcomp(id) {
                AckOutcome::Completed => debug!("message {} complete", id),
                _ => warn!("ignoring PUBCOMP for unknown message {}", id),
            },
            Inbound::PubRel(id) => {
                if !self.tracker.on_pubrel(id) {
                    debug!("PUBREL for unknown message {}", id);
                }
                self.send(&Packet::PubComp(id))?;
            }
            Inbound::SubAck { pkid, code } => {
                if self.pending_suback != Some(pkid) {
                    warn!("ignoring SUBACK for unknown subscription {}", pkid);
                    return Ok(());
                }
                self.pending_suback = None;
                match code {
                    Some(SubAckCode::Granted(qos)) => {
                        info!("subscribed to {} at {:?}", self.router.command_topic(), qos)
                    }
                    _ => error!("broker refused subscription to {}", self.router.command_topic()),
                }
            }
            Inbound::PingResp => {
                if self.ping_sent_ms.take().is_none() {
                    debug!("unsolicited PINGRESP");
                }
            }
            Inbound::Disconnect => {
                info!("broker sent DISCONNECT");
                return Err(self.abort(NetworkError::ConnectionClosed.into()));
            }
            Inbound::Unexpected(name) => warn!("ignoring unexpected {}", name),
        }
        Ok(())
    }

    fn on_connack(&mut self, ack: ConnAck) -> Result<(), Error> {
        if self.state != State::AwaitingConnAck {
            warn!("ignoring CONNACK in state {:?}", self.state);
            return Ok(());
        }
        if ack.code != ConnectReturnCode::Accepted {
            error!("broker refused connection: {:?}", ack.code);
            return Err(self.abort(Error::Refused(ack.code)));
        }

        let now = self.clock.now_ms();
        self.state = State::Connected;
        self.last_sent_ms = now;
        self.last_received_ms = now;
        self.ping_sent_ms = None;
        self.next_publish_ms = Some(now.saturating_add(self.config.publish_interval_ms()));
        self.device.set_status(StatusKind::Network, true);
        info!(
            "connected to {}:{} as {} (keepalive {} s, session present {})",
            self.config.broker_host,
            self.config.broker_port,
            self.client_id.as_str(),
            self.config.keep_alive_secs,
            ack.session_present
        );

        let command_topic = self.router.command_topic();
        let qos = self.router.qos();
        if let Err(e) = self.send(&Packet::Subscribe(Subscribe::single(
            SUBSCRIBE_PACKET_ID,
            command_topic,
            qos,
        ))) {
            // A session without its command subscription is not usable.
            if self.state == State::Disconnected {
                return Err(e);
            }
            return Err(self.abort(e));
        }
        self.pending_suback = Some(SUBSCRIBE_PACKET_ID);
        Ok(())
    }

    fn send(&mut self, packet: &Packet<'_>) -> Result<(), Error> {
        let len = packet.encode(&mut self.tx)?;
        trace!("sending {}", packet.name());
        self.transmit(len)
    }

    /// Write the first `len` bytes of the transmit buffer.
    fn transmit(&mut self, len: usize) -> Result<(), Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let mut sent = 0;
        while sent < len {
            match connection.write(&self.tx[sent..len]) {
                Ok(0) => return Err(self.abort(NetworkError::ConnectionClosed.into())),
                Ok(n) => sent += n,
                Err(_) => return Err(self.abort(NetworkError::WriteError.into())),
            }
        }
        if connection.flush().is_err() {
            return Err(self.abort(NetworkError::WriteError.into()));
        }
        self.last_sent_ms = self.clock.now_ms();
        Ok(())
    }

    fn abort(&mut self, error: Error) -> Error {
        warn!("tearing down session: {:?}", error);
        self.teardown();
        error
    }

    fn teardown(&mut self) {
        let was_connected = matches!(self.state, State::Connected | State::Disconnecting);

        let abandoned = self.tracker.clear();
        if abandoned > 0 {
            warn!("abandoned {} unacknowledged message(s)", abandoned);
        }
        self.rx.clear();
        self.pending_suback = None;
        self.ping_sent_ms = None;
        self.next_publish_ms = None;

        if let Some(connection) = self.connection.take() {
            if connection.close().is_err() {
                debug!("transport close failed");
            }
        }
        if was_connected {
            self.device.set_status(StatusKind::Network, false);
        }
        self.state = State::Disconnected;
    }
}
