#![allow(dead_code)]

use mqtt_node::device::{Command, Device, StatusKind, TelemetrySample};
use mqtt_node::network::application::mqtt::codec::{
    ConnAck, ConnectReturnCode, SubAck, SubAckCode,
};
use mqtt_node::network::application::mqtt::{
    ClientId, Config, Decoded, Packet, Publish, QoS, Session,
};
use mqtt_node::network::error::Error;
use mqtt_node::network::*;
use mqtt_node::time::Clock;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub const BUF: usize = 256;

pub type TestSession = Session<'static, MockNetwork, MockDevice, MockClock, BUF, 4>;

/// A packet the session wrote, copied out of the wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Connect { client_id: String, keep_alive_secs: u16 },
    Publish { topic: String, qos: QoS, pkid: u16, payload: Vec<u8> },
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe { pkid: u16, filter: String, qos: QoS },
    PingReq,
    Disconnect,
    Other(&'static str),
}

impl Sent {
    fn from_packet(packet: &Packet<'_>) -> Self {
        match packet {
            Packet::Connect(c) => Sent::Connect {
                client_id: c.client_id.to_string(),
                keep_alive_secs: c.keep_alive_secs,
            },
            Packet::Publish(p) => Sent::Publish {
                topic: p.topic.to_string(),
                qos: p.qos,
                pkid: p.pkid,
                payload: p.payload.to_vec(),
            },
            Packet::PubAck(id) => Sent::PubAck(*id),
            Packet::PubRec(id) => Sent::PubRec(*id),
            Packet::PubRel(id) => Sent::PubRel(*id),
            Packet::PubComp(id) => Sent::PubComp(*id),
            Packet::Subscribe(s) => Sent::Subscribe {
                pkid: s.pkid,
                filter: s.filters[0].filter.to_string(),
                qos: s.filters[0].qos,
            },
            Packet::PingReq => Sent::PingReq,
            Packet::Disconnect => Sent::Disconnect,
            other => Sent::Other(other.name()),
        }
    }
}

/// Scripted broker behaviour and everything observed on the wire.
#[derive(Debug)]
pub struct BrokerState {
    /// CONNACK return code, `None` to never answer CONNECT.
    pub connack: Option<ConnectReturnCode>,
    /// Delay before a PINGRESP, `None` to never answer.
    pub pingresp_delay_ms: Option<u64>,
    /// Acknowledge client publishes and answer PUBREL.
    pub ack_publishes: bool,
    /// Transport-level connect failures still to report.
    pub fail_connects: u32,
    /// Every write fails.
    pub fail_writes: bool,
    /// The broker closed the current connection.
    pub eof: bool,
    pub connects: u32,
    pub closes: u32,
    pub sent: Vec<(u64, Sent)>,
    inbox: VecDeque<(u64, Vec<u8>)>,
    written: Vec<u8>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            connack: Some(ConnectReturnCode::Accepted),
            pingresp_delay_ms: Some(0),
            ack_publishes: true,
            fail_connects: 0,
            fail_writes: false,
            eof: false,
            connects: 0,
            closes: 0,
            sent: Vec::new(),
            inbox: VecDeque::new(),
            written: Vec::new(),
        }
    }
}

impl BrokerState {
    fn queue(&mut self, at: u64, packet: &Packet<'_>) {
        self.inbox.push_back((at, encode(packet)));
        self.inbox.make_contiguous().sort_by_key(|(at, _)| *at);
    }

    fn respond(&mut self, now: u64, packet: &Packet<'_>) {
        match packet {
            Packet::Connect(_) => {
                if let Some(code) = self.connack {
                    self.queue(now, &Packet::ConnAck(ConnAck { session_present: false, code }));
                }
            }
            Packet::Subscribe(s) => {
                let mut codes = heapless::Vec::new();
                codes.push(SubAckCode::Granted(s.filters[0].qos)).unwrap();
                self.queue(now, &Packet::SubAck(SubAck { pkid: s.pkid, codes }));
            }
            Packet::PingReq => {
                if let Some(delay) = self.pingresp_delay_ms {
                    self.queue(now + delay, &Packet::PingResp);
                }
            }
            Packet::Publish(p) if self.ack_publishes => match p.qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => self.queue(now, &Packet::PubAck(p.pkid)),
                QoS::ExactlyOnce => self.queue(now, &Packet::PubRec(p.pkid)),
            },
            Packet::PubRel(id) if self.ack_publishes => self.queue(now, &Packet::PubComp(*id)),
            _ => {}
        }
    }
}

pub fn encode(packet: &Packet<'_>) -> Vec<u8> {
    let mut buf = vec![0u8; 1024];
    let len = packet.encode(&mut buf).unwrap();
    buf.truncate(len);
    buf
}

/// Test-side view of the broker and the clock.
#[derive(Debug, Clone)]
pub struct Handle {
    pub broker: Rc<RefCell<BrokerState>>,
    pub clock: Rc<Cell<u64>>,
}

impl Handle {
    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    /// Make `packet` readable right away.
    pub fn deliver(&self, packet: &Packet<'_>) {
        self.deliver_at(self.now(), packet);
    }

    pub fn deliver_at(&self, at: u64, packet: &Packet<'_>) {
        self.broker.borrow_mut().queue(at, packet);
    }

    /// Make raw bytes readable right away.
    pub fn deliver_raw(&self, bytes: &[u8]) {
        let now = self.now();
        self.broker.borrow_mut().inbox.push_back((now, bytes.to_vec()));
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.broker.borrow().sent.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<(u64, Sent)> {
        self.broker.borrow().sent.clone()
    }

    pub fn count(&self, pred: impl Fn(&Sent) -> bool) -> usize {
        self.broker.borrow().sent.iter().filter(|(_, s)| pred(s)).count()
    }

    pub fn clear_sent(&self) {
        self.broker.borrow_mut().sent.clear();
    }
}

#[derive(Debug)]
pub struct MockNetwork {
    handle: Handle,
}

impl Connect for MockNetwork {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, remote: &Endpoint<'_>) -> Result<Self::Connection, Self::Error> {
        assert!(!remote.host.is_empty());
        let mut broker = self.handle.broker.borrow_mut();
        if broker.fail_connects > 0 {
            broker.fail_connects -= 1;
            return Err(Error::ConnectionRefused);
        }
        broker.connects += 1;
        broker.eof = false;
        broker.inbox.clear();
        broker.written.clear();
        Ok(MockConnection {
            handle: self.handle.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    handle: Handle,
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let now = self.handle.now();
        let mut broker = self.handle.broker.borrow_mut();
        if broker.eof {
            return Ok(0);
        }
        let mut n = 0;
        while n < buf.len() {
            let Some((at, bytes)) = broker.inbox.front_mut() else {
                break;
            };
            if *at > now {
                break;
            }
            let take = bytes.len().min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&bytes[..take]);
            bytes.drain(..take);
            n += take;
            if bytes.is_empty() {
                broker.inbox.pop_front();
            }
        }
        Ok(n)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let now = self.handle.now();
        let mut broker = self.handle.broker.borrow_mut();
        if broker.fail_writes {
            return Err(Error::WriteError);
        }
        broker.written.extend_from_slice(buf);
        let written = std::mem::take(&mut broker.written);
        let mut offset = 0;
        while let Ok(Decoded::Complete { packet, len }) = Packet::decode(&written[offset..]) {
            broker.sent.push((now, Sent::from_packet(&packet)));
            broker.respond(now, &packet);
            offset += len;
        }
        broker.written = written[offset..].to_vec();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Poll for MockConnection {
    type Error = Error;

    /// Advances the shared clock to the next delivery or by the full timeout.
    fn poll_readable(&mut self, timeout_ms: u32) -> Result<Readiness, Self::Error> {
        let now = self.handle.now();
        let broker = self.handle.broker.borrow();
        if broker.eof {
            return Ok(Readiness::Readable);
        }
        let limit = now + u64::from(timeout_ms);
        match broker.inbox.front() {
            Some((at, _)) if *at <= limit => {
                self.handle.clock.set(now.max(*at));
                Ok(Readiness::Readable)
            }
            _ => {
                self.handle.clock.set(limit);
                Ok(Readiness::TimedOut)
            }
        }
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.handle.broker.borrow_mut().closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

#[derive(Debug)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
    pub delays: Rc<RefCell<Vec<u32>>>,
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays.borrow_mut().push(ms);
        self.now.set(self.now.get() + u64::from(ms));
    }
}

#[derive(Debug)]
pub struct MockDevice {
    pub ready: bool,
    pub reading: Option<f32>,
    pub commands: Vec<Command>,
    pub status: Vec<bool>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            ready: true,
            reading: Some(21.5),
            commands: Vec::new(),
            status: Vec::new(),
        }
    }
}

impl Device for MockDevice {
    type Error = &'static str;

    fn ready(&mut self) -> bool {
        self.ready
    }

    fn read_telemetry(&mut self) -> Result<TelemetrySample, Self::Error> {
        self.reading
            .map(|value| TelemetrySample::new("Celsius", value))
            .ok_or("sensor offline")
    }

    fn execute_command(&mut self, command: &Command) {
        self.commands.push(command.clone());
    }

    fn set_status(&mut self, kind: StatusKind, on: bool) {
        assert_eq!(kind, StatusKind::Network);
        self.status.push(on);
    }
}

/// Keepalive 10 s and a telemetry period long enough to stay out of the way.
pub fn config() -> Config<'static> {
    Config {
        keep_alive_secs: 10,
        publish_interval_secs: 3600,
        ..Config::new("broker.test", "t/telemetry", "t/cmd")
    }
}

pub fn session_with(config: Config<'static>, device: MockDevice) -> (TestSession, Handle, MockClockDelays) {
    let handle = Handle {
        broker: Rc::new(RefCell::new(BrokerState::default())),
        clock: Rc::new(Cell::new(1_000)),
    };
    let delays = Rc::new(RefCell::new(Vec::new()));
    let clock = MockClock {
        now: handle.clock.clone(),
        delays: delays.clone(),
    };
    let network = MockNetwork {
        handle: handle.clone(),
    };
    let client_id = ClientId::from_entropy("test", &[1, 2, 3, 4]).unwrap();
    let session = Session::new(network, device, clock, config, client_id).unwrap();
    (session, handle, delays)
}

pub type MockClockDelays = Rc<RefCell<Vec<u32>>>;

pub fn session() -> (TestSession, Handle) {
    let (session, handle, _) = session_with(config(), MockDevice::default());
    (session, handle)
}

/// A session that is connected and whose SUBACK has been processed.
pub fn connected() -> (TestSession, Handle) {
    let (mut session, handle) = session();
    session.connect().unwrap();
    session.poll().unwrap();
    handle.clear_sent();
    (session, handle)
}

pub fn publish<'a>(topic: &'a str, qos: QoS, pkid: u16, payload: &'a [u8]) -> Packet<'a> {
    Packet::Publish(Publish::new(topic, qos, pkid, payload))
}
