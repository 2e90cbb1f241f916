//! # Event Bus Matching Benchmarks
//!
//! | Benchmark | What it measures |
//! |-----------|------------------|
//! | trie vs linear | memoised trie match against `Topic::matches` over every pattern |
//! | stacked `**` | patterns with several multi-segment wildcards on deep topics |
//! | sync publish | end-to-end `publish_sync` with N matching subscribers |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use event_bus::{handler_fn, BusConfig, Context, Event, EventBus, SubscribeOptions, Topic, Trie};
use rand::Rng;
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

const SEGMENTS: [&str; 8] = [
    "buffer", "cursor", "editor", "lsp", "plugin", "saved", "moved", "changed",
];

fn random_pattern(rng: &mut impl Rng) -> String {
    let depth = rng.gen_range(1..=4);
    (0..depth)
        .map(|_| match rng.gen_range(0..10) {
            0 => "*",
            1 => "**",
            _ => SEGMENTS[rng.gen_range(0..SEGMENTS.len())],
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn random_topic(rng: &mut impl Rng, depth: usize) -> String {
    (0..depth)
        .map(|_| SEGMENTS[rng.gen_range(0..SEGMENTS.len())])
        .collect::<Vec<_>>()
        .join(".")
}

// ============================================================================
// MATCHING
// ============================================================================

fn bench_trie_vs_linear(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic-matching");
    group.measurement_time(Duration::from_secs(5));
    let mut rng = rand::thread_rng();

    for size in [10, 100, 1000] {
        let patterns: Vec<String> = (0..size).map(|_| random_pattern(&mut rng)).collect();
        let trie = Trie::new();
        for pattern in &patterns {
            trie.insert(pattern);
        }
        let pattern_topics: Vec<Topic> = patterns.iter().map(|p| Topic::new(p.as_str())).collect();
        let topic = random_topic(&mut rng, 3);
        let concrete = Topic::new(topic.as_str());

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("trie", size), &topic, |b, topic| {
            b.iter(|| black_box(trie.match_topic(topic)))
        });
        group.bench_with_input(BenchmarkId::new("linear", size), &concrete, |b, concrete| {
            b.iter(|| {
                black_box(
                    pattern_topics
                        .iter()
                        .filter(|p| concrete.matches(p))
                        .count(),
                )
            })
        });
    }

    group.finish();
}

fn bench_stacked_wildcards(c: &mut Criterion) {
    let mut group = c.benchmark_group("stacked-wildcards");

    let trie = Trie::new();
    for pattern in ["**.**.**", "**.a.**", "a.**.**.z", "**.*.**", "**"] {
        trie.insert(pattern);
    }

    for depth in [4, 8, 16] {
        let topic = vec!["a"; depth].join(".");
        group.bench_with_input(BenchmarkId::new("depth", depth), &topic, |b, topic| {
            b.iter(|| black_box(trie.match_topic(topic)))
        });
    }

    group.finish();
}

// ============================================================================
// PUBLISH
// ============================================================================

fn bench_publish_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish-sync");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");

    for subscribers in [1, 10, 50] {
        let bus = EventBus::new(BusConfig::default().with_workers(1)).expect("bus");
        for i in 0..subscribers {
            let pattern = if i % 2 == 0 { "buffer.*" } else { "buffer.**" };
            bus.subscribe(
                pattern,
                handler_fn(|_ctx, _event| async { Ok(()) }),
                SubscribeOptions::default(),
            )
            .expect("subscribe");
        }
        runtime.block_on(async { bus.start() }).expect("start");

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_function(BenchmarkId::new("subscribers", subscribers), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    bus.publish_sync(&Context::background(), Event::envelope("buffer.saved", ()))
                        .await
                        .expect("publish")
                })
            })
        });

        runtime
            .block_on(bus.stop(&Context::background()))
            .expect("stop");
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_trie_vs_linear,
    bench_stacked_wildcards,
    bench_publish_sync
);
criterion_main!(benches);
