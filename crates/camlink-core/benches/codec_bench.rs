//! Criterion benchmarks for the CamLink frame codec.
//!
//! Measures encoding, decoding, and reassembly of the frames a camera link
//! carries most often: setting changes, status responses, and notifications.
//!
//! Run with:
//! ```bash
//! cargo bench --package camlink-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use camlink_core::protocol::{decode_frames, encode_command, encode_message, FrameAssembler};
use camlink_core::{
    Command, CommandKind, DeviceErrorInfo, DeviceId, DeviceMessage, NotificationKind, Parameters,
};
use serde_json::json;

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_status_response() -> DeviceMessage {
    let mut body = Parameters::new();
    body.insert("battery_level".into(), json!(72));
    body.insert("recording".into(), json!(false));
    body.insert("storage_free_mb".into(), json!(48_213));
    body.insert("firmware".into(), json!("2.4.1"));
    DeviceMessage::Response {
        kind: CommandKind::GetStatus,
        sequence_number: 1,
        body,
    }
}

fn make_notification() -> DeviceMessage {
    let mut data = Parameters::new();
    data.insert("level".into(), json!(14));
    DeviceMessage::Notification {
        kind: NotificationKind::BatteryLow,
        sequence_number: 2,
        data,
    }
}

fn make_error() -> DeviceMessage {
    DeviceMessage::Error {
        kind: CommandKind::SetIso,
        sequence_number: 3,
        error: DeviceErrorInfo {
            code: 3,
            message: "value out of range".to_string(),
        },
    }
}

fn fixtures() -> Vec<(&'static str, DeviceMessage)> {
    vec![
        ("Heartbeat", DeviceMessage::Heartbeat { sequence_number: 0 }),
        ("StatusResponse", make_status_response()),
        ("Notification", make_notification()),
        ("Error", make_error()),
    ]
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks `encode_command` for a typical setting change.
fn bench_encode_command(c: &mut Criterion) {
    let device = DeviceId::new("bench-cam");
    let cmd = Command::set_setting("shutter_speed", json!("1/250"));
    c.bench_function("encode_command/SetShutterSpeed", |b| {
        b.iter(|| encode_command(black_box(&device), black_box(&cmd), black_box(7)).unwrap())
    });
}

/// Benchmarks `decode_frames` for every inbound message shape.
fn bench_decode(c: &mut Criterion) {
    let device = DeviceId::new("bench-cam");
    let mut group = c.benchmark_group("decode_frames");
    for (name, msg) in fixtures() {
        let bytes = encode_message(&msg).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("msg", name), &bytes, |b, bytes| {
            b.iter(|| decode_frames(black_box(&device), black_box(bytes)))
        });
    }
    group.finish();
}

/// Benchmarks reassembly of a response delivered in 20-byte BLE-sized chunks.
fn bench_reassembly(c: &mut Criterion) {
    let device = DeviceId::new("bench-cam");
    let bytes = encode_message(&make_status_response()).expect("encode must succeed");
    c.bench_function("assembler/status_in_20_byte_chunks", |b| {
        b.iter(|| {
            let mut assembler = FrameAssembler::new();
            let mut out = Vec::new();
            for chunk in bytes.chunks(20) {
                out.extend(assembler.push(&device, black_box(chunk)));
            }
            out
        })
    });
}

criterion_group!(benches, bench_encode_command, bench_decode, bench_reassembly);
criterion_main!(benches);
