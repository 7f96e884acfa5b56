//! Benchmarks for the telemetry codec and wire framing
//!
//! Covers the per-value work on the operator side:
//! - JPEG frame decode at common camera resolutions
//! - IMU arity check and motor current unpacking
//! - Envelope framing for back-to-back telemetry messages
//!
//! Platform: Cross-platform (synthetic frames, CI-safe)

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use robolink::codec::{ImuDecoder, PayloadDecoder, decode_frame, decode_motor_current};
use robolink::test_utils::sample_frame;
use robolink::wire::{Envelope, ImuMessage, MotorCurrentMessage, Payload, WireCodec};
use robolink::wire::CallId;
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for (width, height) in [(320, 240), (640, 480), (1280, 720)] {
        let frame = sample_frame(width, height);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &frame,
            |b, frame| b.iter(|| black_box(decode_frame(black_box(frame.as_bytes())))),
        );
    }

    group.finish();
}

fn bench_small_payloads(c: &mut Criterion) {
    let imu = ImuDecoder::new(3);
    let payload = Payload::Imu(ImuMessage { values: vec![0.01, -0.02, 9.81] });

    c.bench_function("imu_decode", |b| {
        b.iter(|| black_box(imu.decode(black_box(payload.clone()))))
    });

    c.bench_function("motor_current_decode", |b| {
        b.iter(|| {
            let sample = decode_motor_current(black_box(MotorCurrentMessage {
                value: 1234567890123456789,
            }));
            black_box(sample.bytes())
        })
    });
}

fn bench_envelope_framing(c: &mut Criterion) {
    let mut codec = WireCodec::new(8 * 1024 * 1024);
    let mut encoded = BytesMut::new();
    for seq in 1..=256 {
        let payload = Payload::Imu(ImuMessage { values: vec![seq as f32, 0.0, 9.8] });
        codec
            .encode(Envelope::item(CallId(1), seq, payload), &mut encoded)
            .expect("envelope encodes");
    }

    let mut group = c.benchmark_group("envelope_framing");
    group.throughput(Throughput::Elements(256));
    group.bench_function("decode_256_imu_items", |b| {
        b.iter(|| {
            let mut codec = WireCodec::new(8 * 1024 * 1024);
            let mut buf = encoded.clone();
            let mut count = 0;
            while let Some(envelope) = codec.decode(&mut buf).expect("valid stream") {
                black_box(envelope);
                count += 1;
            }
            count
        })
    });
    group.finish();
}

criterion_group!(benches, bench_frame_decode, bench_small_payloads, bench_envelope_framing);
criterion_main!(benches);
