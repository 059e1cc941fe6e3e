use criterion::{criterion_group, criterion_main};

mod mqtt;

criterion_group!(
    benches,
    mqtt::codec::bench_encode_publish,
    mqtt::codec::bench_decode_stream,
    mqtt::tracker::bench_qos2_cycle
);
criterion_main!(benches);
