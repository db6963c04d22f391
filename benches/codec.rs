//! Benchmarks for request encoding and response decoding
use base64::Engine;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use exec_router::communication::{decode_response, encode_request};
use exec_router::{HttpMethod, Request};
use std::hint::black_box;

fn response_json(body_len: usize) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "status": 200,
        "headers": { "Cache-Control": "no-store" },
        "body": "x".repeat(body_len),
    }))
    .unwrap()
}

fn bench_encode(c: &mut Criterion) {
    let request = Request::builder(HttpMethod::POST, "/orders/new")
        .header("Content-Type", "application/json")
        .header("Accept", "text/html")
        .query_param("page", "2")
        .body(vec![b'a'; 4096])
        .build()
        .unwrap();

    c.bench_function("encode_request", |b| {
        b.iter(|| black_box(encode_request(black_box(&request)).unwrap()));
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_response");

    for size in [64usize, 4096, 65536].iter() {
        let json = response_json(*size);
        let wrapped = base64::engine::general_purpose::STANDARD.encode(&json).into_bytes();

        group.bench_with_input(BenchmarkId::new("json", size), &json, |b, bytes| {
            b.iter(|| black_box(decode_response(bytes).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("base64-json", size), &wrapped, |b, bytes| {
            b.iter(|| black_box(decode_response(bytes).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
