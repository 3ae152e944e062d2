//! Hot path benchmarks for the per-event pipeline.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Every upstream byte goes through SSE framing, every frame through JSON
//! decoding, and every event through the filter.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use event_relay::event::InboundEvent;
use event_relay::filter::EventFilter;
use event_relay::transport::{SseDecoder, SseFrame};

fn sample_stream(events: usize) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..events {
        out.push_str("event: pause-equivalent\n");
        out.push_str(&format!(
            "data: {{\"rewardId\":\"RWD-{}\",\"user\":\"viewer-{}\",\"cost\":500}}\n",
            i % 8,
            i
        ));
        out.push_str(&format!("id: {}\n\n", i));
        if i % 10 == 0 {
            out.push_str(": keep-alive\n\n");
        }
    }
    out.into_bytes()
}

/// SseDecoder over a buffer delivered in fixed-size network chunks
fn bench_sse_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("sse_decode");
    let stream = sample_stream(100);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk_size in [64, 512, 4096] {
        group.bench_function(format!("chunk_{}", chunk_size), |b| {
            b.iter(|| {
                let mut decoder = SseDecoder::new();
                let mut frames = 0;
                for chunk in stream.chunks(chunk_size) {
                    frames += decoder.feed(black_box(chunk)).map_or(0, |f| f.len());
                }
                black_box(frames)
            })
        });
    }

    group.finish();
}

/// JSON decoding of a frame into an InboundEvent
fn bench_event_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_decode");
    group.throughput(Throughput::Elements(1));

    let frame = SseFrame::named(
        "pause-equivalent",
        r#"{"rewardId":"RWD-1","user":"viewer-1","cost":500,"note":"hello"}"#,
    );
    group.bench_function("from_frame", |b| {
        b.iter(|| InboundEvent::from_frame(black_box(&frame), 0))
    });

    group.finish();
}

/// Filter decision for matching and non-matching events
fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(1));

    let filter = EventFilter::default();
    let frame = SseFrame::named("pause-equivalent", r#"{"rewardId":"RWD-1"}"#);
    let event = match InboundEvent::from_frame(&frame, 0) {
        Ok(event) => event,
        Err(e) => panic!("sample event must decode: {}", e),
    };

    group.bench_function("match", |b| {
        b.iter(|| filter.matches(black_box(&event), black_box("RWD-1")))
    });
    group.bench_function("miss", |b| {
        b.iter(|| filter.matches(black_box(&event), black_box("RWD-2")))
    });
    group.bench_function("select_clone", |b| {
        b.iter(|| filter.select(black_box(event.clone()), black_box("RWD-1")))
    });

    group.finish();
}

criterion_group!(benches, bench_sse_decode, bench_event_decode, bench_filter);

criterion_main!(benches);
