//! Criterion benchmarks for the AOF frame codec and the partial decoder.
//!
//! Run with:
//! ```bash
//! cargo bench --package aof-core --bench frame_bench
//! ```

use aof_core::protocol::frame::{decode_server_frame, encode_request, split_response, MAX_CHUNK_LEN};
use aof_core::protocol::partial_decode;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rmpv::Value;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_listing(items: usize) -> Vec<u8> {
    let value = Value::Map(vec![(
        Value::from("items"),
        Value::Array(
            (0..items)
                .map(|i| {
                    Value::Map(vec![
                        (Value::from("uri"), Value::from(format!("example.com:///feed/{i}"))),
                        (Value::from("title"), Value::from("A reasonably long item title")),
                        (Value::from("read"), Value::from(i % 3 == 0)),
                    ])
                })
                .collect(),
        ),
    )]);
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &value).expect("fixture must encode");
    buf
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode_request(c: &mut Criterion) {
    let payload = [0x81, 0xA3, b'u', b'r', b'i', 0xA4, b'a', b':', b'/', b'b'];
    c.bench_function("encode_request", |b| {
        b.iter(|| encode_request(black_box(7), black_box("source"), black_box(&payload)).unwrap())
    });
}

/// Decodes every frame of a chunked response of increasing size.
fn bench_decode_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_response");
    for items in [10usize, 1_000, 5_000] {
        let frames = split_response(1, &make_listing(items), MAX_CHUNK_LEN)
            .expect("fixture must split");
        group.bench_with_input(BenchmarkId::new("items", items), &frames, |b, frames| {
            b.iter(|| {
                for frame in frames {
                    black_box(decode_server_frame(black_box(frame)).unwrap());
                }
            })
        });
    }
    group.finish();
}

/// Partial decode of half of a large listing, the hot path while streaming.
fn bench_partial_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_decode");
    for items in [100usize, 5_000] {
        let bytes = make_listing(items);
        let half = bytes[..bytes.len() / 2].to_vec();
        group.bench_with_input(BenchmarkId::new("half", items), &half, |b, half| {
            b.iter(|| partial_decode(black_box(half)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode_request, bench_decode_response, bench_partial_decode);
criterion_main!(benches);
