//! Benchmarks for the relay hot paths.
//!
//! Performance-critical paths:
//! - `EventEnvelope::to_body`: serialization on every publish
//! - `BranchRelay::run`: backlog drain from queue to client sink

use async_trait::async_trait;
use branch_relay::branch::{BranchId, PublishTarget};
use branch_relay::broker::InMemoryBroker;
use branch_relay::gate::TokenPresenceGate;
use branch_relay::publisher::{EventEnvelope, EventPublisher};
use branch_relay::relay::{BranchRelay, ClientSink, RelayConfig, SinkError};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Counts frames and hangs up after `target` of them.
struct CountingSink {
    received: usize,
    target: usize,
    done: CancellationToken,
}

#[async_trait]
impl ClientSink for CountingSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        black_box(text);
        self.received += 1;
        if self.received >= self.target {
            self.done.cancel();
        }
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

async fn seeded_broker(messages: usize) -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    let publisher = EventPublisher::new(Arc::new(broker.clone()), RelayConfig::default().backlog_ttl);
    let target = PublishTarget::Branch(BranchId::new("bench").expect("valid branch id"));
    for i in 0..messages {
        publisher
            .try_publish(&target, "tick", &json!({ "seq": i }))
            .await
            .expect("publish to in-memory broker");
    }
    broker
}

async fn drain(broker: InMemoryBroker, messages: usize) -> usize {
    let relay = BranchRelay::new(
        PublishTarget::Branch(BranchId::new("bench").expect("valid branch id")),
        Arc::new(broker),
        Arc::new(TokenPresenceGate),
        RelayConfig::default(),
    );
    let done = CancellationToken::new();
    let mut sink = CountingSink {
        received: 0,
        target: messages,
        done: done.clone(),
    };
    relay.run(Some("bench"), &mut sink, done).await;
    sink.received
}

fn bench_envelope_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encoding");

    let small = json!({ "id": 7 });
    let large = json!({
        "id": 7,
        "items": (0..100).map(|i| json!({ "sku": format!("sku-{i}"), "qty": i })).collect::<Vec<_>>(),
    });

    for (name, payload) in [("small", &small), ("large", &large)] {
        group.bench_with_input(BenchmarkId::new("to_body", name), payload, |b, payload| {
            b.iter(|| {
                EventEnvelope::new("order_updated", black_box(payload))
                    .and_then(|envelope| envelope.to_body())
            });
        });
    }

    group.finish();
}

fn bench_backlog_replay(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("backlog_replay");

    for messages in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(u64::try_from(messages).unwrap_or(u64::MAX)));
        group.bench_with_input(
            BenchmarkId::new("drain", messages),
            &messages,
            |b, &messages| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        let broker = seeded_broker(messages).await;
                        let start = Instant::now();
                        black_box(drain(broker, messages).await);
                        total += start.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_envelope_encoding, bench_backlog_replay);
criterion_main!(benches);
