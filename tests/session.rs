mod common;

use common::*;
use mqtt_node::device::Command;
use mqtt_node::network::application::mqtt::codec::ConnectReturnCode;
use mqtt_node::network::application::mqtt::config::ConfigError;
use mqtt_node::network::application::mqtt::router::RouterError;
use mqtt_node::network::application::mqtt::{
    ClientId, Config, Error, Packet, Phase, QoS, Session, State,
};
use mqtt_node::network::error::Error as NetworkError;

#[test]
fn connect_subscribes_to_command_topic() {
    let (mut session, handle) = session();
    assert_eq!(session.state(), State::Disconnected);

    session.connect().unwrap();
    assert_eq!(session.state(), State::Connected);
    assert_eq!(session.device().status, [true]);

    let sent = handle.sent();
    assert_eq!(
        sent[0],
        Sent::Connect {
            client_id: session.client_id().as_str().to_string(),
            keep_alive_secs: 10,
        }
    );
    assert_eq!(
        sent[1],
        Sent::Subscribe {
            pkid: 5841,
            filter: "t/cmd".to_string(),
            qos: QoS::AtLeastOnce,
        }
    );
    // the SUBACK is consumed by the next poll
    session.poll().unwrap();
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn refused_connack_disconnects() {
    let (mut session, handle) = session();
    handle.broker.borrow_mut().connack = Some(ConnectReturnCode::NotAuthorized);

    assert_eq!(
        session.connect(),
        Err(Error::Refused(ConnectReturnCode::NotAuthorized))
    );
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(handle.broker.borrow().closes, 1);
    // never connected, so the link indicator was never touched
    assert!(session.device().status.is_empty());
}

#[test]
fn missing_connack_times_out() {
    let (mut session, handle) = session();
    handle.broker.borrow_mut().connack = None;
    let start = handle.now();

    assert_eq!(session.connect(), Err(Error::HandshakeTimeout));
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(handle.now() - start, 1_000);
    assert_eq!(handle.broker.borrow().closes, 1);
}

#[test]
fn connect_with_retry_waits_between_attempts() {
    let (mut session, handle, delays) = session_with(config(), MockDevice::default());
    handle.broker.borrow_mut().fail_connects = 2;

    assert_eq!(session.connect_with_retry(), 3);
    assert_eq!(session.state(), State::Connected);
    assert_eq!(*delays.borrow(), [1_000, 1_000]);
    assert_eq!(handle.broker.borrow().connects, 1);
}

#[test]
fn device_not_ready_blocks_connect() {
    let device = MockDevice {
        ready: false,
        ..MockDevice::default()
    };
    let (mut session, handle, _) = session_with(config(), device);

    assert_eq!(session.connect(), Err(Error::DeviceNotReady));
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(handle.broker.borrow().connects, 0);
}

#[test]
fn payload_limit_larger_than_buffers_is_rejected() {
    let config = Config {
        payload_limit: BUF + 1,
        ..config()
    };
    assert_eq!(
        build(config),
        Err(Error::Config(ConfigError::InvalidPayloadLimit))
    );
}

#[test]
fn idle_connection_sends_one_pingreq_per_interval() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().pingresp_delay_ms = Some(5_000);
    let start = handle.now();

    while handle.now() < start + 20_000 {
        session.poll().unwrap();
    }

    let pings: Vec<u64> = handle
        .sent_at()
        .into_iter()
        .filter(|(_, sent)| *sent == Sent::PingReq)
        .map(|(at, _)| at)
        .collect();
    // one at the 1x mark, the next only once the interval is exceeded again
    assert_eq!(pings[0], start + 10_000);
    assert_eq!(pings.iter().filter(|at| **at < start + 20_000).count(), 1);
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn unanswered_ping_tears_down_at_twice_keepalive() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().pingresp_delay_ms = None;
    let start = handle.now();

    let error = loop {
        if let Err(e) = session.poll() {
            break e;
        }
    };

    assert_eq!(error, Error::KeepaliveTimeout);
    assert_eq!(handle.now(), start + 20_000);
    assert_eq!(handle.count(|s| *s == Sent::PingReq), 1);
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.device().status, [true, false]);
}

#[test]
fn keepalive_zero_never_pings() {
    let (mut session, handle, _) = session_with(
        Config {
            keep_alive_secs: 0,
            ..config()
        },
        MockDevice::default(),
    );
    session.connect().unwrap();
    let start = handle.now();
    while handle.now() < start + 60_000 {
        session.poll().unwrap();
    }
    assert_eq!(handle.count(|s| *s == Sent::PingReq), 0);
}

#[test]
fn command_publish_is_dispatched_and_acknowledged() {
    let (mut session, handle) = connected();

    handle.deliver(&publish("t/cmd", QoS::AtLeastOnce, 3, b"led_on"));
    session.poll().unwrap();

    assert_eq!(session.device().commands, [Command::LedOn]);
    assert_eq!(handle.sent(), [Sent::PubAck(3)]);
}

#[test]
fn unknown_commands_and_foreign_topics_are_dropped() {
    let (mut session, handle) = connected();

    handle.deliver(&publish("t/cmd", QoS::AtMostOnce, 0, b"reboot"));
    handle.deliver(&publish("t/other", QoS::AtLeastOnce, 4, b"led_off"));
    session.poll().unwrap();

    assert!(session.device().commands.is_empty());
    // the foreign publish is still acknowledged
    assert_eq!(handle.sent(), [Sent::PubAck(4)]);
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn inbound_qos2_flow_routes_once() {
    let (mut session, handle) = connected();

    handle.deliver(&publish("t/cmd", QoS::ExactlyOnce, 7, b"led_off"));
    session.poll().unwrap();
    // broker redelivers before seeing our PUBREC
    handle.deliver(&publish("t/cmd", QoS::ExactlyOnce, 7, b"led_off"));
    session.poll().unwrap();
    handle.deliver(&Packet::PubRel(7));
    session.poll().unwrap();

    assert_eq!(session.device().commands, [Command::LedOff]);
    assert_eq!(
        handle.sent(),
        [Sent::PubRec(7), Sent::PubRec(7), Sent::PubComp(7)]
    );
    assert_eq!(session.tracker().inbound_pending(), 0);
}

#[test]
fn pubrel_for_unknown_id_is_still_completed() {
    let (mut session, handle) = connected();
    handle.deliver(&Packet::PubRel(99));
    session.poll().unwrap();
    assert_eq!(handle.sent(), [Sent::PubComp(99)]);
}

#[test]
fn outbound_qos2_flow_sends_one_pubrel() {
    let (mut session, handle) = connected();

    // ids 1..=6 go through QoS 1
    for _ in 0..6 {
        session.publish("t/data", b"x", QoS::AtLeastOnce).unwrap();
        session.poll().unwrap();
    }
    assert_eq!(session.in_flight(), 0);

    handle.broker.borrow_mut().ack_publishes = false;
    let id = session
        .publish("t/data", b"23.5", QoS::ExactlyOnce)
        .unwrap();
    assert_eq!(id, Some(7));
    assert_eq!(session.tracker().phase(7), Some(Phase::AwaitingPubRec));

    handle.deliver(&Packet::PubRec(7));
    session.poll().unwrap();
    assert_eq!(session.tracker().phase(7), Some(Phase::AwaitingPubComp));
    // a duplicate PUBREC does not produce a second PUBREL
    handle.deliver(&Packet::PubRec(7));
    session.poll().unwrap();
    handle.deliver(&Packet::PubComp(7));
    session.poll().unwrap();

    assert_eq!(session.in_flight(), 0);
    assert_eq!(handle.count(|s| *s == Sent::PubRel(7)), 1);
}

#[test]
fn unmatched_acks_leave_in_flight_untouched() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().ack_publishes = false;
    let id = session.publish("t/data", b"x", QoS::AtLeastOnce).unwrap().unwrap();

    for packet in [
        Packet::PubAck(id + 1),
        Packet::PubRec(id),
        Packet::PubComp(id),
        Packet::PubRec(500),
    ] {
        handle.deliver(&packet);
    }
    session.poll().unwrap();

    assert_eq!(session.in_flight(), 1);
    assert_eq!(session.tracker().phase(id), Some(Phase::AwaitingPubAck));
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn in_flight_capacity_is_enforced() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().ack_publishes = false;

    for _ in 0..4 {
        session.publish("t/data", b"x", QoS::AtLeastOnce).unwrap();
    }
    assert_eq!(
        session.publish("t/data", b"x", QoS::AtLeastOnce),
        Err(Error::InFlightFull)
    );
    // QoS 0 needs no slot
    assert_eq!(session.publish("t/data", b"x", QoS::AtMostOnce), Ok(None));
}

#[test]
fn broker_close_clears_state_and_reconnects() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().ack_publishes = false;
    session.publish("t/data", b"x", QoS::AtLeastOnce).unwrap();
    assert_eq!(session.in_flight(), 1);

    handle.broker.borrow_mut().eof = true;
    assert_eq!(
        session.poll(),
        Err(Error::Network(NetworkError::ConnectionClosed))
    );
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.device().status, [true, false]);
    assert_eq!(session.poll(), Err(Error::NotConnected));

    handle.clear_sent();
    session.connect().unwrap();
    assert_eq!(session.state(), State::Connected);
    assert!(matches!(handle.sent()[0], Sent::Connect { .. }));
    assert_eq!(handle.broker.borrow().connects, 2);
}

#[test]
fn write_failure_tears_down() {
    let (mut session, handle) = connected();
    handle.broker.borrow_mut().fail_writes = true;

    assert_eq!(
        session.publish("t/data", b"x", QoS::AtLeastOnce),
        Err(Error::Network(NetworkError::WriteError))
    );
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.in_flight(), 0);
}

#[test]
fn broker_disconnect_tears_down() {
    let (mut session, handle) = connected();
    handle.deliver(&Packet::Disconnect);
    assert!(session.poll().is_err());
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(handle.broker.borrow().closes, 1);
}

#[test]
fn explicit_disconnect() {
    let (mut session, handle) = connected();
    session.disconnect().unwrap();

    assert_eq!(handle.sent(), [Sent::Disconnect]);
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.device().status, [true, false]);
    assert_eq!(session.disconnect(), Err(Error::NotConnected));
    assert_eq!(
        session.publish("t/data", b"x", QoS::AtMostOnce),
        Err(Error::NotConnected)
    );
}

#[test]
fn telemetry_is_published_on_schedule() {
    let (mut session, handle, _) = session_with(
        Config {
            publish_interval_secs: 5,
            keep_alive_secs: 60,
            ..config()
        },
        MockDevice::default(),
    );
    session.connect().unwrap();
    let start = handle.now();

    while handle.now() < start + 5_000 {
        session.poll().unwrap();
    }

    let telemetry: Vec<Sent> = handle
        .sent()
        .into_iter()
        .filter(|s| matches!(s, Sent::Publish { .. }))
        .collect();
    assert_eq!(
        telemetry,
        [Sent::Publish {
            topic: "t/telemetry".to_string(),
            qos: QoS::AtLeastOnce,
            pkid: 1,
            payload: br#"{"unit":"Celsius","value":21.5}"#.to_vec(),
        }]
    );
}

#[test]
fn failed_sensor_read_skips_one_cycle() {
    let device = MockDevice {
        reading: None,
        ..MockDevice::default()
    };
    let (mut session, handle, _) = session_with(
        Config {
            publish_interval_secs: 5,
            keep_alive_secs: 60,
            ..config()
        },
        device,
    );
    session.connect().unwrap();
    assert_eq!(
        session.publish_telemetry(),
        Err(Error::Telemetry(RouterError::Device))
    );

    let start = handle.now();
    while handle.now() < start + 12_000 {
        session.poll().unwrap();
    }
    assert_eq!(session.state(), State::Connected);
    assert_eq!(handle.count(|s| matches!(s, Sent::Publish { .. })), 0);

    session.device_mut().reading = Some(19.0);
    assert_eq!(session.publish_telemetry(), Ok(Some(1)));
}

#[test]
fn oversized_publish_is_skipped() {
    let (mut session, handle) = connected();
    let big = vec![b'x'; BUF * 2];

    handle.deliver(&publish("t/cmd", QoS::AtMostOnce, 0, &big));
    handle.deliver(&publish("t/cmd", QoS::AtMostOnce, 0, b"led_on"));
    while session.device().commands.is_empty() {
        session.poll().unwrap();
    }

    assert_eq!(session.device().commands, [Command::LedOn]);
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn malformed_frame_is_discarded() {
    let (mut session, handle) = connected();

    // PUBACK with a trailing byte
    handle.deliver_raw(&[0x40, 3, 0, 1, 9]);
    handle.deliver(&publish("t/cmd", QoS::AtMostOnce, 0, b"led_off"));
    session.poll().unwrap();

    assert_eq!(session.device().commands, [Command::LedOff]);
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let config = Config {
        publish_topic: "t/#",
        ..config()
    };
    assert_eq!(build(config), Err(Error::Config(ConfigError::InvalidTopic)));
}

#[test]
fn wildcard_command_topic_is_rejected() {
    let config = Config {
        command_topic: "t/+/cmd",
        ..config()
    };
    assert_eq!(build(config), Err(Error::Config(ConfigError::InvalidTopic)));
}

#[test]
fn topics_that_cannot_be_framed_are_rejected() {
    let long: &'static str = Box::leak("c".repeat(BUF).into_boxed_str());

    let config = Config {
        command_topic: long,
        ..config()
    };
    assert_eq!(build(config), Err(Error::Config(ConfigError::InvalidTopic)));

    let config = Config {
        publish_topic: long,
        ..common::config()
    };
    assert_eq!(
        build(config),
        Err(Error::Config(ConfigError::InvalidPayloadLimit))
    );
}

#[test]
fn longest_framable_command_topic_still_subscribes() {
    // 3 bytes of fixed header, packet id, length prefix, QoS byte
    let topic: &'static str = Box::leak("c".repeat(BUF - 3 - 2 - 2 - 1).into_boxed_str());
    let (mut session, handle, _) = session_with(
        Config {
            command_topic: topic,
            ..config()
        },
        MockDevice::default(),
    );

    session.connect().unwrap();
    assert_eq!(session.state(), State::Connected);
    assert_eq!(handle.count(|sent| matches!(sent, Sent::Subscribe { .. })), 1);
}

fn build(config: Config<'static>) -> Result<(), Error> {
    let client_id = ClientId::from_entropy("test", b"1").unwrap();
    Session::<_, _, _, BUF, 4>::new(NullNetwork, MockDevice::default(), NullClock, config, client_id)
        .map(|_| ())
}

struct NullNetwork;

impl mqtt_node::network::Connect for NullNetwork {
    type Connection = common::MockConnection;
    type Error = ();

    fn connect(
        &mut self,
        _: &mqtt_node::network::Endpoint<'_>,
    ) -> Result<Self::Connection, Self::Error> {
        Err(())
    }
}

struct NullClock;

impl mqtt_node::time::Clock for NullClock {
    fn now_ms(&self) -> u64 {
        0
    }

    fn delay_ms(&mut self, _: u32) {}
}
