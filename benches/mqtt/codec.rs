use criterion::{BenchmarkId, Criterion, Throughput};
use mqtt_node::network::application::mqtt::buffer::RxBuffer;
use mqtt_node::network::application::mqtt::{Decoded, Packet, Publish, QoS};
use std::hint::black_box;

const PAYLOAD_SIZES: [usize; 3] = [16, 128, 400];

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");
    let mut buf = [0u8; 512];

    for size in PAYLOAD_SIZES {
        let payload = vec![0x42u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let packet = Packet::Publish(Publish::new(
                    "node/telemetry",
                    QoS::AtLeastOnce,
                    1,
                    payload,
                ));
                black_box(packet.encode(&mut buf).unwrap())
            })
        });
    }
    group.finish();
}

/// Decodes a burst of acks and publishes the way the session drains its
/// receive buffer.
pub fn bench_decode_stream(c: &mut Criterion) {
    let mut stream = Vec::new();
    let mut buf = [0u8; 512];
    for id in 1..=8u16 {
        let publish = Packet::Publish(Publish::new("node/cmd", QoS::AtLeastOnce, id, b"led_on"));
        for packet in [publish, Packet::PubAck(id), Packet::PingResp] {
            let len = packet.encode(&mut buf).unwrap();
            stream.extend_from_slice(&buf[..len]);
        }
    }

    let mut group = c.benchmark_group("decode_stream");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("publish_ack_ping", |b| {
        b.iter(|| {
            let mut rx = RxBuffer::<512>::new();
            rx.spare_mut()[..stream.len()].copy_from_slice(&stream);
            rx.commit(stream.len());
            let mut packets = 0;
            while let Ok(Decoded::Complete { len, .. }) = Packet::decode(rx.data()) {
                rx.consume(len);
                packets += 1;
            }
            black_box(packets)
        })
    });
    group.finish();
}
