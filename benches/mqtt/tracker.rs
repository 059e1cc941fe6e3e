use criterion::Criterion;
use mqtt_node::network::application::mqtt::{AckTracker, QoS};
use std::hint::black_box;

pub fn bench_qos2_cycle(c: &mut Criterion) {
    let mut tracker = AckTracker::<4, 128>::new();
    let payload = [0x17u8; 64];

    c.bench_function("tracker_qos2_cycle", |b| {
        b.iter(|| {
            let id = tracker.track(QoS::ExactlyOnce, &payload, 0).unwrap();
            black_box(tracker.on_pubrec(id));
            black_box(tracker.on_pubcomp(id))
        })
    });
}
