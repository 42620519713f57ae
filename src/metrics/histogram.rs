//! Histogram: the bucketed half of the double-buffered sampling protocol,
//! with per-bucket exemplars.
//!
//! Bucket count is a per-instance runtime parameter, so a histogram is one
//! block laid out as `[HistogramHead][2N AtomicUInt64 bucket counters][N
//! ExemplarCell]s`, with the variable regions viewed through
//! [`crate::layout::Slice`] rather than the compile-time-sized [`Array`].
//! Keeping all three regions in a single block (rather than three separate
//! allocations) means one child metric is one `Box`, addressable by a
//! single `(start, size)` pair, which is what
//! `crate::registry::LabeledCollector`'s shared map stores per label tuple.

use std::collections::BTreeMap;

use crate::arena::{Arena, Block};
use crate::atomic::{AtomicDouble, AtomicUInt64};
use crate::container::{Dict, ObjectHeader};
use crate::error::{ConfigError, ConstructError, MetricError};
use crate::layout::{struct_layout, Array, Double, Layout, Slice};
use crate::lock::{InterprocessLock, RawMutex};
use crate::util::genmask;

use super::{now_seconds, Exemplar};

/// The classic Prometheus client default buckets (`+inf` is appended by
/// [`Histogram::new`], not listed here).
pub const DEFAULT_BUCKETS: &[f64] = &[
  0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

struct_layout! {
  /// Fixed-size half of one hot/cold buffer: per-bucket counters live in
  /// the same block, sized to the instance's bucket count.
  pub struct HistogramBuffer {
    sum: AtomicDouble,
    count: AtomicUInt64,
  }
}

struct_layout! {
  pub struct HistogramHead {
    lock: RawMutex,
    /// Top bit selects the hot buffer; low 63 bits count completed writes.
    count: AtomicUInt64,
    created: Double,
    data: Array<HistogramBuffer, 2>,
  }
}

struct_layout! {
  /// One exemplar slot per bucket threshold. Not double-buffered: both the
  /// writer and the reader always reach it through `lock`, the same lock
  /// the reader holds for the whole flip/quiesce/merge sequence, so there
  /// is no benefit to splitting it hot/cold.
  pub struct ExemplarCell {
    amount: Double,
    ts: Double,
    labels: ObjectHeader,
  }
}

fn bucket_counts_span(n: usize) -> (usize, usize) {
  let start = HistogramHead::SIZE;
  (start, start + 2 * n * AtomicUInt64::SIZE)
}

fn exemplar_cells_span(n: usize) -> (usize, usize) {
  let (_, end) = bucket_counts_span(n);
  (end, end + n * ExemplarCell::SIZE)
}

/// A cumulative histogram over caller-chosen (or default) bucket upper
/// bounds.
pub struct Histogram {
  arena: Arena,
  block: Block,
  thresholds: Vec<f64>,
}

pub struct HistogramSample {
  pub thresholds: Vec<f64>,
  /// Cumulative bucket counts, one per `thresholds` entry.
  pub cumulative_counts: Vec<u64>,
  pub sum: f64,
  pub count: u64,
  pub created: f64,
  pub exemplars: Vec<Option<Exemplar>>,
}

/// Validates and normalizes a bucket list: strictly increasing, `+inf`
/// appended if absent, at least two thresholds.
pub(crate) fn normalize_buckets(buckets: Option<Vec<f64>>) -> Result<Vec<f64>, ConfigError> {
  let mut thresholds = buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
  for w in thresholds.windows(2) {
    if !(w[0] < w[1]) {
      return Err(ConfigError::InvalidBuckets("thresholds must be strictly increasing"));
    }
  }
  if thresholds.last().copied() != Some(f64::INFINITY) {
    thresholds.push(f64::INFINITY);
  }
  if thresholds.len() < 2 {
    return Err(ConfigError::InvalidBuckets("at least two thresholds are required"));
  }
  Ok(thresholds)
}

fn block_size_for(n: usize) -> usize {
  let (_, end) = exemplar_cells_span(n);
  end
}

impl Histogram {
  pub(crate) fn new(arena: &Arena, buckets: Option<Vec<f64>>) -> Result<Self, ConstructError> {
    let thresholds = normalize_buckets(buckets)?;
    let n = thresholds.len();

    let block = arena.malloc_cache_aligned(block_size_for(n) as u32)?;
    {
      let bytes = block.deref_mut();
      HistogramHead::init(&mut bytes[..HistogramHead::SIZE]);
      let (bstart, bend) = bucket_counts_span(n);
      Slice::init::<AtomicUInt64>(&mut bytes[bstart..bend]);
      let (estart, eend) = exemplar_cells_span(n);
      Slice::init::<ExemplarCell>(&mut bytes[estart..eend]);
    }

    let histogram = Self {
      arena: arena.clone(),
      block,
      thresholds,
    };
    histogram.head().created.set(now_seconds());
    Ok(histogram)
  }

  /// Reattaches to a histogram another process already constructed with the
  /// same `thresholds`.
  pub(crate) fn attach(arena: &Arena, block: Block, thresholds: Vec<f64>) -> Self {
    Self {
      arena: arena.clone(),
      block,
      thresholds,
    }
  }

  pub(crate) fn block(&self) -> &Block {
    &self.block
  }

  pub fn buckets(&self) -> &[f64] {
    &self.thresholds
  }

  fn head(&self) -> &HistogramHead {
    HistogramHead::view(&self.block.deref()[..HistogramHead::SIZE])
  }

  fn bucket_counts(&self) -> &[AtomicUInt64] {
    let (start, end) = bucket_counts_span(self.thresholds.len());
    Slice::view::<AtomicUInt64>(&self.block.deref()[start..end])
  }

  fn exemplar_cells(&self) -> &[ExemplarCell] {
    let (start, end) = exemplar_cells_span(self.thresholds.len());
    Slice::view::<ExemplarCell>(&self.block.deref()[start..end])
  }

  /// `bisect_left` of the sorted thresholds: the first bucket whose upper
  /// bound is `>= amount`.
  fn bucket_of(&self, amount: f64) -> usize {
    self.thresholds.partition_point(|&t| t < amount)
  }

  pub fn observe(
    &self,
    amount: f64,
    exemplar_labels: Option<&BTreeMap<String, String>>,
  ) -> Result<(), MetricError> {
    let n = self.thresholds.len();
    let head = self.head();
    let ticket = head.count.fetch_add_wrapping(1);
    let buf = (ticket >> 63) as usize;
    let i = self.bucket_of(amount);
    let hot = head.data.get(buf);
    hot.sum.add(amount, true)?;
    hot.count.add(1, true)?;
    self.bucket_counts()[buf * n + i].add(1, true)?;

    if let Some(labels) = exemplar_labels {
      let _guard = head.lock.lock()?;
      let cell = &self.exemplar_cells()[i];
      cell.amount.set(amount);
      cell.ts.set(now_seconds());
      let dict: Dict<String, String> = Dict::new(&cell.labels, &self.arena);
      dict.clear();
      for (k, v) in labels {
        dict.insert(k.clone(), v.clone());
      }
    }
    Ok(())
  }

  pub(crate) fn sample(&self) -> Result<HistogramSample, MetricError> {
    let head = self.head();
    let _guard = head.lock.lock()?;
    let n = self.thresholds.len();

    let c = head.count.fetch_add_wrapping(1u64 << 63);
    let cold_buf = (c >> 63) as usize;
    let hot_buf = 1 - cold_buf;
    let expected = c & genmask(62, 0);

    let cold_head = head.data.get(cold_buf);
    while cold_head.count.get() != expected {
      std::thread::yield_now();
    }

    let sum = cold_head.sum.get();
    let count = cold_head.count.get();

    let buckets = self.bucket_counts();
    let cold_buckets: Vec<u64> = (0..n).map(|i| buckets[cold_buf * n + i].get()).collect();

    let hot_head = head.data.get(hot_buf);
    let _ = hot_head.sum.add(sum, false);
    let _ = hot_head.count.add(count, false);
    for (i, &v) in cold_buckets.iter().enumerate() {
      let _ = buckets[hot_buf * n + i].add(v, false);
      buckets[cold_buf * n + i].set(0);
    }
    cold_head.sum.set(0.0);
    cold_head.count.set(0);

    let mut cumulative_counts = Vec::with_capacity(n);
    let mut running = 0u64;
    for &b in &cold_buckets {
      running += b;
      cumulative_counts.push(running);
    }

    let exemplars = self
      .exemplar_cells()
      .iter()
      .map(|cell| {
        if cell.labels.len.get() == 0 {
          None
        } else {
          let dict: Dict<String, String> = Dict::new(&cell.labels, &self.arena);
          Some(Exemplar {
            labels: dict.snapshot(),
            value: cell.amount.get(),
            timestamp: cell.ts.get(),
          })
        }
      })
      .collect();

    Ok(HistogramSample {
      thresholds: self.thresholds.clone(),
      cumulative_counts,
      sum,
      count,
      created: head.created.get(),
      exemplars,
    })
  }
}
