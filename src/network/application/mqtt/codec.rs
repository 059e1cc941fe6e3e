//! MQTT 3.1.1 control packet codec.
//!
//! Encoding writes into a caller-owned slice and decoding borrows topics and
//! payloads straight out of the caller's receive buffer, so the codec itself
//! owns no memory. Decoding is resumable: [`Packet::decode`] reports
//! [`Decoded::Incomplete`] until the whole frame is present and the caller
//! simply retries once more bytes have arrived.
//!
//! # Frame layout
//!
//! ```text
//! ┌────────────┬───────────────────┬──────────────────┬───────────┐
//! │ type|flags │ remaining length  │ variable header  │  payload  │
//! │   1 byte   │   1..=4 bytes     │                  │           │
//! └────────────┴───────────────────┴──────────────────┴───────────┘
//! ```

use super::QoS;
use heapless::Vec;

/// Maximum number of topic filters carried by one SUBSCRIBE / SUBACK.
pub const MAX_SUBSCRIPTIONS: usize = 4;
/// Largest value the remaining-length field can encode.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

// MQTT Control Packet types - these are the fixed header packet type values
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const PUBREC: u8 = 0x50;
const PUBREL: u8 = 0x60;
const PUBCOMP: u8 = 0x70;
const SUBSCRIBE: u8 = 0x80;
const SUBACK: u8 = 0x90;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by MQTT 3.1.1 specification
const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;
const SUBACK_FAILURE: u8 = 0x80;

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted = 0,
    /// The broker does not support protocol level 4.
    UnacceptableProtocolVersion = 1,
    /// The client identifier is not allowed.
    IdentifierRejected = 2,
    /// The MQTT service is unavailable.
    ServerUnavailable = 3,
    /// Malformed user name or password.
    BadCredentials = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadCredentials,
            5 => ConnectReturnCode::NotAuthorized,
            _ => return None,
        })
    }
}

/// CONNECT: the first packet of every session. No will, no credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect<'a> {
    /// The client identifier.
    pub client_id: &'a str,
    /// Keepalive interval in seconds; 0 disables keepalive.
    pub keep_alive_secs: u16,
    /// Ask the broker to discard any previous session state.
    pub clean_session: bool,
}

/// CONNACK: the broker's answer to CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    /// Whether the broker resumed a stored session.
    pub session_present: bool,
    /// Outcome of the connection attempt.
    pub code: ConnectReturnCode,
}

/// PUBLISH in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    /// Topic name (no wildcards).
    pub topic: &'a str,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Packet identifier; only present on the wire for QoS 1 and 2.
    pub pkid: u16,
    /// Redelivery flag.
    pub dup: bool,
    /// Retain flag.
    pub retain: bool,
    /// Application payload.
    pub payload: &'a [u8],
}

impl<'a> Publish<'a> {
    /// A non-retained, first-delivery publish.
    pub fn new(topic: &'a str, qos: QoS, pkid: u16, payload: &'a [u8]) -> Self {
        Self {
            topic,
            qos,
            pkid,
            dup: false,
            retain: false,
            payload,
        }
    }
}

/// One topic filter of a SUBSCRIBE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeFilter<'a> {
    /// Topic filter, wildcards allowed.
    pub filter: &'a str,
    /// Maximum QoS requested.
    pub qos: QoS,
}

/// SUBSCRIBE: request delivery of matching publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe<'a> {
    /// Packet identifier echoed by the SUBACK.
    pub pkid: u16,
    /// Requested filters.
    pub filters: Vec<SubscribeFilter<'a>, MAX_SUBSCRIPTIONS>,
}

impl<'a> Subscribe<'a> {
    /// A SUBSCRIBE carrying a single filter.
    pub fn single(pkid: u16, filter: &'a str, qos: QoS) -> Self {
        let mut filters = Vec::new();
        // Capacity is at least one, so the first push always succeeds.
        let _ = filters.push(SubscribeFilter { filter, qos });
        Self { pkid, filters }
    }
}

/// Per-filter result carried by a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubAckCode {
    /// Subscription accepted at the given maximum QoS.
    Granted(QoS),
    /// Subscription refused.
    Failure,
}

/// SUBACK: the broker's answer to SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Packet identifier of the SUBSCRIBE being acknowledged.
    pub pkid: u16,
    /// One result per requested filter, in order.
    pub codes: Vec<SubAckCode, MAX_SUBSCRIPTIONS>,
}

/// An MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Client → broker connection request.
    Connect(Connect<'a>),
    /// Broker → client connection result.
    ConnAck(ConnAck),
    /// Application message.
    Publish(Publish<'a>),
    /// QoS 1 acknowledgment.
    PubAck(u16),
    /// QoS 2 step 2: publish received.
    PubRec(u16),
    /// QoS 2 step 3: publish release.
    PubRel(u16),
    /// QoS 2 step 4: publish complete.
    PubComp(u16),
    /// Subscription request.
    Subscribe(Subscribe<'a>),
    /// Subscription result.
    SubAck(SubAck),
    /// Keepalive probe.
    PingReq,
    /// Keepalive answer.
    PingResp,
    /// Orderly shutdown.
    Disconnect,
}

/// Result of a decode attempt on a possibly partial buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A whole packet was decoded from the first `len` bytes.
    Complete {
        /// The packet.
        packet: Packet<'a>,
        /// Number of bytes the frame occupied.
        len: usize,
    },
    /// More bytes are needed.
    Incomplete {
        /// Total frame length, once the fixed header has been received.
        frame_len: Option<usize>,
    },
}

/// Encoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The packet does not fit the output buffer or the protocol limits.
    Overflow,
}

/// Decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The fixed header is invalid; frame boundaries are lost.
    InvalidHeader,
    /// A complete frame of `len` bytes is not a valid packet and can be skipped.
    Malformed {
        /// Length of the offending frame.
        len: usize,
    },
}

/// Total size of a frame whose body is `remaining` bytes long.
pub fn frame_len(remaining: usize) -> usize {
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

impl<'a> Packet<'a> {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PubRec(_) => "PUBREC",
            Packet::PubRel(_) => "PUBREL",
            Packet::PubComp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let remaining = self.remaining_len();
        if remaining > MAX_REMAINING_LENGTH {
            return Err(EncodeError::Overflow);
        }

        let mut w = Writer::new(buf);

        // --- Fixed Header ---
        w.put_u8(self.header_byte())?;
        w.put_remaining_length(remaining)?;

        // --- Variable Header + Payload ---
        match self {
            Packet::Connect(connect) => {
                w.put_str(PROTOCOL_NAME)?;
                w.put_u8(PROTOCOL_LEVEL)?;
                w.put_u8(if connect.clean_session { CLEAN_SESSION } else { 0 })?;
                w.put_u16(connect.keep_alive_secs)?;
                w.put_str(connect.client_id)?;
            }
            Packet::ConnAck(ack) => {
                w.put_u8(u8::from(ack.session_present))?;
                w.put_u8(ack.code as u8)?;
            }
            Packet::Publish(publish) => {
                w.put_str(publish.topic)?;
                if publish.qos != QoS::AtMostOnce {
                    w.put_u16(publish.pkid)?;
                }
                w.put_slice(publish.payload)?;
            }
            Packet::PubAck(id) | Packet::PubRec(id) | Packet::PubRel(id) | Packet::PubComp(id) => {
                w.put_u16(*id)?;
            }
            Packet::Subscribe(subscribe) => {
                w.put_u16(subscribe.pkid)?;
                for filter in &subscribe.filters {
                    w.put_str(filter.filter)?;
                    w.put_u8(filter.qos as u8)?;
                }
            }
            Packet::SubAck(ack) => {
                w.put_u16(ack.pkid)?;
                for code in &ack.codes {
                    w.put_u8(match code {
                        SubAckCode::Granted(qos) => *qos as u8,
                        SubAckCode::Failure => SUBACK_FAILURE,
                    })?;
                }
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        Ok(w.pos)
    }

    /// Decode the packet at the start of `buf`.
    ///
    /// Trailing bytes after the first frame are left untouched; the returned
    /// length tells the caller how much to consume.
    pub fn decode(buf: &'a [u8]) -> Result<Decoded<'a>, DecodeError> {
        let Some((header_len, remaining)) = frame_header(buf)? else {
            return Ok(Decoded::Incomplete { frame_len: None });
        };
        let len = header_len + remaining;
        if buf.len() < len {
            return Ok(Decoded::Incomplete {
                frame_len: Some(len),
            });
        }
        let packet = decode_body(buf[0], &buf[header_len..len]).ok_or(DecodeError::Malformed { len })?;
        Ok(Decoded::Complete { packet, len })
    }

    fn header_byte(&self) -> u8 {
        match self {
            Packet::Connect(_) => CONNECT,
            Packet::ConnAck(_) => CONNACK,
            Packet::Publish(publish) => {
                let mut flags = PUBLISH | ((publish.qos as u8) << 1);
                if publish.dup {
                    flags |= 0x08;
                }
                if publish.retain {
                    flags |= 0x01;
                }
                flags
            }
            Packet::PubAck(_) => PUBACK,
            Packet::PubRec(_) => PUBREC,
            Packet::PubRel(_) => PUBREL | 0x02,
            Packet::PubComp(_) => PUBCOMP,
            Packet::Subscribe(_) => SUBSCRIBE | 0x02,
            Packet::SubAck(_) => SUBACK,
            Packet::PingReq => PINGREQ,
            Packet::PingResp => PINGRESP,
            Packet::Disconnect => DISCONNECT,
        }
    }

    fn remaining_len(&self) -> usize {
        match self {
            // name (2 + 4) + level + flags + keepalive (2) + client id
            Packet::Connect(connect) => 10 + 2 + connect.client_id.len(),
            Packet::ConnAck(_) => 2,
            Packet::Publish(publish) => {
                let pkid = if publish.qos == QoS::AtMostOnce { 0 } else { 2 };
                2 + publish.topic.len() + pkid + publish.payload.len()
            }
            Packet::PubAck(_) | Packet::PubRec(_) | Packet::PubRel(_) | Packet::PubComp(_) => 2,
            Packet::Subscribe(subscribe) => {
                2 + subscribe
                    .filters
                    .iter()
                    .map(|f| 2 + f.filter.len() + 1)
                    .sum::<usize>()
            }
            Packet::SubAck(ack) => 2 + ack.codes.len(),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        }
    }
}

/// Parse the fixed header, returning `(header length, remaining length)`.
fn frame_header(buf: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    // Packet types 0 and 15 are reserved.
    if matches!(first & 0xF0, 0x00 | 0xF0) {
        return Err(DecodeError::InvalidHeader);
    }

    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    for i in 0..4 {
        let Some(&byte) = buf.get(1 + i) else {
            return Ok(None);
        };
        remaining += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((2 + i, remaining)));
        }
        multiplier *= 128;
    }
    Err(DecodeError::InvalidHeader)
}

fn decode_body(header: u8, body: &[u8]) -> Option<Packet<'_>> {
    let flags = header & 0x0F;
    let mut r = Reader::new(body);

    let packet = match (header & 0xF0, flags) {
        (CONNECT, 0) => {
            if r.str()? != PROTOCOL_NAME || r.u8()? != PROTOCOL_LEVEL {
                return None;
            }
            let connect_flags = r.u8()?;
            // Reserved bit, will and credentials are not supported.
            if connect_flags & !CLEAN_SESSION != 0 {
                return None;
            }
            let keep_alive_secs = r.u16()?;
            let client_id = r.str()?;
            Packet::Connect(Connect {
                client_id,
                keep_alive_secs,
                clean_session: connect_flags & CLEAN_SESSION != 0,
            })
        }
        (CONNACK, 0) => {
            let ack_flags = r.u8()?;
            if ack_flags & !0x01 != 0 {
                return None;
            }
            let code = ConnectReturnCode::from_u8(r.u8()?)?;
            Packet::ConnAck(ConnAck {
                session_present: ack_flags & 0x01 != 0,
                code,
            })
        }
        (PUBLISH, _) => {
            let qos = QoS::from_bits((flags >> 1) & 0x03)?;
            let topic = r.str()?;
            if topic.is_empty() || topic.contains(['+', '#']) {
                return None;
            }
            let pkid = if qos == QoS::AtMostOnce {
                0
            } else {
                r.packet_id()?
            };
            Packet::Publish(Publish {
                topic,
                qos,
                pkid,
                dup: flags & 0x08 != 0,
                retain: flags & 0x01 != 0,
                payload: r.rest(),
            })
        }
        (PUBACK, 0) => Packet::PubAck(r.packet_id()?),
        (PUBREC, 0) => Packet::PubRec(r.packet_id()?),
        (PUBREL, 0x02) => Packet::PubRel(r.packet_id()?),
        (PUBCOMP, 0) => Packet::PubComp(r.packet_id()?),
        (SUBSCRIBE, 0x02) => {
            let pkid = r.packet_id()?;
            let mut filters = Vec::new();
            while !r.is_empty() {
                let filter = r.str()?;
                let qos = QoS::from_bits(r.u8()?)?;
                filters.push(SubscribeFilter { filter, qos }).ok()?;
            }
            if filters.is_empty() {
                return None;
            }
            Packet::Subscribe(Subscribe { pkid, filters })
        }
        (SUBACK, 0) => {
            let pkid = r.packet_id()?;
            let mut codes = Vec::new();
            while !r.is_empty() {
                let code = match r.u8()? {
                    SUBACK_FAILURE => SubAckCode::Failure,
                    bits => SubAckCode::Granted(QoS::from_bits(bits)?),
                };
                codes.push(code).ok()?;
            }
            Packet::SubAck(SubAck { pkid, codes })
        }
        (PINGREQ, 0) => Packet::PingReq,
        (PINGRESP, 0) => Packet::PingResp,
        (DISCONNECT, 0) => Packet::Disconnect,
        _ => return None,
    };

    r.is_empty().then_some(packet)
}

struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_u8(&mut self, byte: u8) -> Result<(), EncodeError> {
        let slot = self.buf.get_mut(self.pos).ok_or(EncodeError::Overflow)?;
        *slot = byte;
        self.pos += 1;
        Ok(())
    }

    fn put_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.put_slice(&value.to_be_bytes())
    }

    fn put_slice(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let end = self.pos + bytes.len();
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(EncodeError::Overflow)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> Result<(), EncodeError> {
        let len = u16::try_from(s.len()).map_err(|_| EncodeError::Overflow)?;
        self.put_u16(len)?;
        self.put_slice(s.as_bytes())
    }

    /// Variable byte integer: 7 bits per byte, high bit set when more follow.
    fn put_remaining_length(&mut self, mut len: usize) -> Result<(), EncodeError> {
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            self.put_u8(byte)?;
            if len == 0 {
                return Ok(());
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.bytes(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn packet_id(&mut self) -> Option<u16> {
        self.u16().filter(|id| *id != 0)
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(bytes)
    }

    fn str(&mut self) -> Option<&'a str> {
        let len = usize::from(self.u16()?);
        core::str::from_utf8(self.bytes(len)?).ok()
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        self.pos = self.buf.len();
        rest
    }
}
