use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tokio::{runtime::Builder, sync::mpsc};
use wwtkdr_core::{
    CorrelationId, PollPolicy,
    dispatch::{ReplyDispatcher, SequencedBuffer},
    proto::ReplyFragment,
};

// Fragments per simulated reply.
const FRAGMENTS: u64 = 256;

// Interleaved requests sharing one reply channel.
const REQUESTS: usize = 8;

fn fragment(id: CorrelationId, seq: u64) -> ReplyFragment {
    ReplyFragment::ok(id, seq)
        .with_more(seq + 1 < FRAGMENTS)
        .with_chunk(vec![0u8; 64])
}

/// Worst-case arrival order for a reorder buffer: highest sequence first.
fn reversed(id: CorrelationId) -> Vec<ReplyFragment> {
    (0..FRAGMENTS).rev().map(|seq| fragment(id, seq)).collect()
}

fn bench_sequenced_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequenced_buffer");
    group.throughput(Throughput::Elements(FRAGMENTS));

    let id = CorrelationId::new();

    group.bench_function(format!("in_order/{FRAGMENTS}"), |b| {
        b.iter_batched(
            || (0..FRAGMENTS).map(|seq| fragment(id, seq)).collect::<Vec<_>>(),
            |fragments| {
                let mut buffer = SequencedBuffer::new();
                for f in fragments {
                    buffer.accumulate(f);
                    while let Some(next) = buffer.try_take_next() {
                        black_box(next);
                    }
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function(format!("reversed/{FRAGMENTS}"), |b| {
        b.iter_batched(
            || reversed(id),
            |fragments| {
                let mut buffer = SequencedBuffer::new();
                for f in fragments {
                    buffer.accumulate(f);
                }
                while let Some(next) = buffer.try_take_next() {
                    black_box(next);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Drains `REQUESTS` interleaved replies through one dispatcher, one poller
/// per request.
fn bench_dispatcher(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let mut group = c.benchmark_group("reply_dispatcher");
    group.throughput(Throughput::Elements(FRAGMENTS * REQUESTS as u64));

    group.bench_function(format!("interleaved/{REQUESTS}x{FRAGMENTS}"), |b| {
        b.to_async(&runtime).iter(|| async {
            let ids: Vec<_> = (0..REQUESTS).map(|_| CorrelationId::new()).collect();
            let (tx, rx) = mpsc::channel(FRAGMENTS as usize * REQUESTS);
            let dispatcher = ReplyDispatcher::new(rx, PollPolicy::new(Duration::from_millis(50), 20));
            for id in &ids {
                dispatcher.begin(*id);
            }

            for seq in (0..FRAGMENTS).rev() {
                for id in &ids {
                    tx.send(fragment(*id, seq)).await.expect("channel open");
                }
            }

            let pollers = ids.iter().map(|id| {
                let dispatcher = &dispatcher;
                async move {
                    for _ in 0..FRAGMENTS {
                        black_box(dispatcher.next_reply(*id).await.expect("fragment"));
                    }
                    dispatcher.finish_buffering(*id);
                }
            });
            futures::future::join_all(pollers).await;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sequenced_buffer, bench_dispatcher);
criterion_main!(benches);
