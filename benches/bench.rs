//! Throughput of the hot paths spec.md section 5 calls out as wait-free:
//! `Counter::inc`, `Gauge::set`, `Summary::observe`, `Histogram::observe`,
//! and the allocator call every metric constructor goes through,
//! `Arena::malloc`.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use either::Either;
use mpmetrics::registry::{counter, gauge, histogram, summary, Registry};
use mpmetrics::Arena;

fn arena() -> Arena {
  Arena::create_anonymous(1 << 20).unwrap()
}

fn bench_arena_malloc(c: &mut Criterion) {
  c.bench_function("arena_malloc_64b", |b| {
    b.iter_batched(arena, |arena| arena.malloc(64, 8).unwrap(), BatchSize::SmallInput);
  });
}

fn bench_counter_inc(c: &mut Criterion) {
  let registry = Registry::new();
  let arena = arena();
  let metric = counter(&registry, &arena, "bench_counter_total", "h", &[], "", "", "")
    .unwrap()
    .labels(Either::Left(vec![]))
    .unwrap();
  c.bench_function("counter_inc", |b| b.iter(|| metric.inc(1).unwrap()));
}

fn bench_gauge_set(c: &mut Criterion) {
  let registry = Registry::new();
  let arena = arena();
  let metric = gauge(&registry, &arena, "bench_gauge", "h", &[], "", "", "")
    .unwrap()
    .labels(Either::Left(vec![]))
    .unwrap();
  c.bench_function("gauge_set", |b| b.iter(|| metric.set(1.0)));
}

fn bench_summary_observe(c: &mut Criterion) {
  let registry = Registry::new();
  let arena = arena();
  let metric = summary(&registry, &arena, "bench_summary", "h", &[], "", "", "")
    .unwrap()
    .labels(Either::Left(vec![]))
    .unwrap();
  c.bench_function("summary_observe", |b| b.iter(|| metric.observe(1.0, None).unwrap()));
}

fn bench_histogram_observe(c: &mut Criterion) {
  let registry = Registry::new();
  let arena = arena();
  let metric = histogram(&registry, &arena, "bench_histogram", "h", &[], "", "", "", None)
    .unwrap()
    .labels(Either::Left(vec![]))
    .unwrap();
  c.bench_function("histogram_observe", |b| b.iter(|| metric.observe(1.0, None).unwrap()));
}

fn bench_histogram_sample_under_contention(c: &mut Criterion) {
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::thread;

  let registry = Registry::new();
  let arena = arena();
  let metric = histogram(&registry, &arena, "bench_histogram_sample", "h", &[], "", "", "", None)
    .unwrap()
    .labels(Either::Left(vec![]))
    .unwrap();

  let stop = Arc::new(AtomicBool::new(false));
  let writers: Vec<_> = (0..4)
    .map(|_| {
      let metric = Arc::clone(&metric);
      let stop = Arc::clone(&stop);
      thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
          metric.observe(1.0, None).unwrap();
        }
      })
    })
    .collect();

  // `sample()` itself is crate-private; go through `collect()`, which is
  // what a real scraper calls and what actually runs the flip/quiesce/merge
  // protocol under contention.
  c.bench_function("histogram_collect_under_writer_contention", |b| {
    b.iter(|| registry.collect());
  });

  stop.store(true, Ordering::Relaxed);
  for w in writers {
    w.join().unwrap();
  }
}

criterion_group!(
  benches,
  bench_arena_malloc,
  bench_counter_inc,
  bench_gauge_set,
  bench_summary_observe,
  bench_histogram_observe,
  bench_histogram_sample_under_contention,
);
criterion_main!(benches);
