use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sensornet_core::udp::calculate_backoff_ms;
use sensornet_core::{sleep, Message, MAX_MESSAGE_LENGTH};

fn sample_frame() -> Message {
    let mut msg = Message::new(1, 0);
    msg.sender = 5;
    msg.last = 5;
    msg.set_version(sensornet_core::PROTOCOL_VERSION)
        .set_request_ack(true)
        .set_float(23.456, 2);
    msg
}

fn benchmark_encode(c: &mut Criterion) {
    let msg = sample_frame();
    let mut buffer = [0u8; MAX_MESSAGE_LENGTH];

    c.bench_function("encode_float_frame", |b| {
        b.iter(|| black_box(&msg).encode(&mut buffer));
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let bytes = sample_frame().to_bytes();

    c.bench_function("decode_float_frame", |b| {
        b.iter(|| Message::decode(black_box(&bytes)));
    });
}

fn benchmark_value_rendering(c: &mut Criterion) {
    let msg = sample_frame();
    let mut custom = Message::new(1, 0);
    custom.set_custom(&[0xDE; 25]);

    c.bench_function("render_float_value", |b| {
        b.iter(|| black_box(&msg).to_value_string());
    });
    c.bench_function("hex_full_payload", |b| {
        b.iter(|| {
            let text = black_box(&custom).to_hex();
            let mut restored = Message::new(1, 0);
            restored.set_hex(&text).map(|m| m.length())
        });
    });
}

fn benchmark_sleep_plan(c: &mut Criterion) {
    c.bench_function("plan_one_hour_sleep", |b| {
        b.iter(|| sleep::plan(black_box(3_600_000 - 1)));
    });
}

fn benchmark_link_backoff(c: &mut Criterion) {
    c.bench_function("calculate_exponential_backoff", |b| {
        b.iter(|| {
            for attempt in 0..10 {
                calculate_backoff_ms(attempt, black_box(100), black_box(10000));
            }
        });
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_decode,
    benchmark_value_rendering,
    benchmark_sleep_plan,
    benchmark_link_backoff
);
criterion_main!(benches);
