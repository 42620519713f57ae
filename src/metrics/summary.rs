//! Summary: tracks count and sum of observations via a hot/cold
//! double-buffered sampling protocol, with no configurable buckets.

use std::collections::BTreeMap;

use crate::arena::{Arena, ArenaError};
use crate::atomic::{AtomicDouble, AtomicUInt64};
use crate::container::{Dict, ObjectHeader};
use crate::error::MetricError;
use crate::layout::{struct_layout, Array, Boxed, Double, Layout};
use crate::lock::{InterprocessLock, RawMutex};
use crate::util::genmask;

use super::{now_seconds, Exemplar};

struct_layout! {
  /// One of the two buffers `Summary` round-robins between. `count` doubles
  /// as the ticket counter's quiesce target and the externally-reported
  /// observation count.
  pub struct SummaryBuffer {
    sum: AtomicDouble,
    count: AtomicUInt64,
  }
}

struct_layout! {
  pub struct SummaryData {
    /// Guards reader flip/quiesce/merge and, separately, writer updates to
    /// the exemplar group.
    lock: RawMutex,
    /// Top bit selects the hot buffer; low 63 bits count completed writes.
    count: AtomicUInt64,
    created: Double,
    data: Array<SummaryBuffer, 2>,
    exemplar_value: Double,
    exemplar_ts: Double,
    exemplar_labels: ObjectHeader,
  }
}

/// Tracks the count and sum of observations, with no configurable buckets.
pub struct Summary {
  data: Boxed<SummaryData>,
}

pub struct SummarySample {
  pub sum: f64,
  pub count: u64,
  pub created: f64,
  pub exemplar: Option<Exemplar>,
}

impl Summary {
  pub(crate) fn new(arena: &Arena) -> Result<Self, ArenaError> {
    let data = Boxed::new(arena)?;
    data.created.set(now_seconds());
    Ok(Self { data })
  }

  pub(crate) fn attach(arena: &Arena, block: crate::arena::Block) -> Self {
    Self {
      data: Boxed::from_block(arena, block),
    }
  }

  pub(crate) fn block(&self) -> &crate::arena::Block {
    self.data.block()
  }

  /// Records `amount`. Wait-free except when an exemplar is supplied, which
  /// takes `lock`.
  pub fn observe(
    &self,
    amount: f64,
    exemplar_labels: Option<&BTreeMap<String, String>>,
  ) -> Result<(), MetricError> {
    let ticket = self.data.count.fetch_add_wrapping(1);
    let hot = self.data.data.get((ticket >> 63) as usize);
    hot.sum.add(amount, true)?;
    hot.count.add(1, true)?;

    if let Some(labels) = exemplar_labels {
      let _guard = self.data.lock.lock()?;
      self.data.exemplar_value.set(amount);
      self.data.exemplar_ts.set(now_seconds());
      let dict: Dict<String, String> = Dict::new(&self.data.exemplar_labels, self.data.arena());
      dict.clear();
      for (k, v) in labels {
        dict.insert(k.clone(), v.clone());
      }
    }
    Ok(())
  }

  /// Flips the hot/cold buffers, quiesces for in-flight writers to the
  /// now-cold buffer, reads it, merges it back into the new hot buffer, and
  /// returns the snapshot.
  pub(crate) fn sample(&self) -> Result<SummarySample, MetricError> {
    let _guard = self.data.lock.lock()?;
    let c = self.data.count.fetch_add_wrapping(1u64 << 63);
    let cold_index = (c >> 63) as usize;
    let hot_index = 1 - cold_index;
    let expected = c & genmask(62, 0);

    let cold = self.data.data.get(cold_index);
    while cold.count.get() != expected {
      std::thread::yield_now();
    }

    let sum = cold.sum.get();
    let count = cold.count.get();

    let hot = self.data.data.get(hot_index);
    let _ = hot.sum.add(sum, false);
    let _ = hot.count.add(count, false);
    cold.sum.set(0.0);
    cold.count.set(0);

    let exemplar = if self.data.exemplar_labels.len.get() == 0 {
      None
    } else {
      let dict: Dict<String, String> = Dict::new(&self.data.exemplar_labels, self.data.arena());
      Some(Exemplar {
        labels: dict.snapshot(),
        value: self.data.exemplar_value.get(),
        timestamp: self.data.exemplar_ts.get(),
      })
    };

    Ok(SummarySample {
      sum,
      count,
      created: self.data.created.get(),
      exemplar,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn observe_accumulates_sum_and_count_across_samples() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let s = Summary::new(&arena).unwrap();
    s.observe(1.0, None).unwrap();
    s.observe(2.5, None).unwrap();
    let sample = s.sample().unwrap();
    assert_eq!(sample.count, 2);
    assert_eq!(sample.sum, 3.5);

    s.observe(0.5, None).unwrap();
    let sample = s.sample().unwrap();
    assert_eq!(sample.count, 3);
    assert_eq!(sample.sum, 4.0);
  }

  #[test]
  fn observe_during_sample_is_not_lost() {
    use std::sync::Arc;
    use std::thread;

    let arena = Arena::create_anonymous(4096).unwrap();
    let summary = Arc::new(Summary::new(&arena).unwrap());

    let writer = {
      let summary = Arc::clone(&summary);
      thread::spawn(move || {
        for _ in 0..5_000 {
          summary.observe(1.0, None).unwrap();
        }
      })
    };

    // `sample` is cumulative, not a delta, so repeated calls while the
    // writer is still running just exercise the flip/quiesce/merge path
    // concurrently with writes; only the final read after the writer joins
    // needs to match.
    while !writer.is_finished() {
      let sample = summary.sample().unwrap();
      assert_eq!(sample.sum, sample.count as f64);
    }
    writer.join().unwrap();
    let sample = summary.sample().unwrap();
    assert_eq!(sample.count, 5_000);
    assert_eq!(sample.sum, 5_000.0);
  }
}
