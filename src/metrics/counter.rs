//! A monotonically increasing count, with an optional exemplar recording
//! the labels of the most recent increment.

use std::collections::BTreeMap;

use crate::arena::{Arena, ArenaError};
use crate::atomic::AtomicUInt64;
use crate::container::{Dict, ObjectHeader};
use crate::error::{ArgumentError, MetricError};
use crate::layout::{struct_layout, Boxed, Double, Layout, SizeT};
use crate::lock::{InterprocessLock, RawMutex};

use super::{now_seconds, Exemplar};

struct_layout! {
  /// `lock` only ever guards the three exemplar cells as a group; `total`
  /// is updated without it.
  pub struct CounterData {
    lock: RawMutex,
    total: AtomicUInt64,
    created: Double,
    exemplar_amount: SizeT,
    exemplar_ts: Double,
    exemplar_labels: ObjectHeader,
  }
}

/// A monotonic counter, arena-allocated via [`Boxed`].
pub struct Counter {
  data: Boxed<CounterData>,
}

/// Raw values read by [`Counter::sample`]; the registry turns this into a
/// named, labeled [`super::Sample`].
pub struct CounterSample {
  pub total: u64,
  pub created: f64,
  pub exemplar: Option<Exemplar>,
}

impl Counter {
  pub(crate) fn new(arena: &Arena) -> Result<Self, ArenaError> {
    let data = Boxed::new(arena)?;
    data.created.set(now_seconds());
    Ok(Self { data })
  }

  /// Reattaches to a counter another process already constructed.
  pub(crate) fn attach(arena: &Arena, block: crate::arena::Block) -> Self {
    Self {
      data: Boxed::from_block(arena, block),
    }
  }

  pub(crate) fn block(&self) -> &crate::arena::Block {
    self.data.block()
  }

  fn validate_amount(amount: i64) -> Result<u64, MetricError> {
    if amount < 0 {
      return Err(ArgumentError::NegativeAmount.into());
    }
    Ok(amount as u64)
  }

  /// `inc(amount)`: `amount` must be non-negative; an amount that would
  /// overflow `total` raises [`crate::error::OverflowError`] and leaves the
  /// counter unchanged.
  pub fn inc(&self, amount: i64) -> Result<(), MetricError> {
    self.inc_with_exemplar(amount, None)
  }

  /// `inc(amount, exemplar=...)`: as [`Counter::inc`], additionally
  /// recording `exemplar_labels` as the exemplar for this increment under
  /// `lock`.
  pub fn inc_with_exemplar(
    &self,
    amount: i64,
    exemplar_labels: Option<&BTreeMap<String, String>>,
  ) -> Result<(), MetricError> {
    let delta = Self::validate_amount(amount)?;
    self.data.total.add(delta, true)?;

    if let Some(labels) = exemplar_labels {
      let _guard = self.data.lock.lock()?;
      self.data.exemplar_amount.set(delta);
      self.data.exemplar_ts.set(now_seconds());
      let dict: Dict<String, String> = Dict::new(&self.data.exemplar_labels, self.data.arena());
      dict.clear();
      for (k, v) in labels {
        dict.insert(k.clone(), v.clone());
      }
    }
    Ok(())
  }

  /// Reads the exemplar group under `lock`, then reads `total` atomically.
  pub(crate) fn sample(&self) -> Result<CounterSample, MetricError> {
    let exemplar = {
      let _guard = self.data.lock.lock()?;
      if self.data.exemplar_labels.len.get() == 0 {
        None
      } else {
        let dict: Dict<String, String> = Dict::new(&self.data.exemplar_labels, self.data.arena());
        Some(Exemplar {
          labels: dict.snapshot(),
          value: self.data.exemplar_amount.get() as f64,
          timestamp: self.data.exemplar_ts.get(),
        })
      }
    };
    Ok(CounterSample {
      total: self.data.total.get(),
      created: self.data.created.get(),
      exemplar,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inc_accumulates_and_rejects_negative() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let c = Counter::new(&arena).unwrap();
    c.inc(1).unwrap();
    c.inc(7).unwrap();
    assert_eq!(c.sample().unwrap().total, 8);
    assert!(matches!(
      c.inc(-1).unwrap_err(),
      MetricError::Argument(ArgumentError::NegativeAmount)
    ));
  }

  #[test]
  fn inc_overflow_is_reported_and_leaves_total_unchanged() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let c = Counter::new(&arena).unwrap();
    // Drive total to u64::MAX directly via the raw atomic, since no
    // sequence of `i64`-bounded `inc` calls can reach it.
    c.data.total.add(u64::MAX, true).unwrap();
    assert_eq!(c.sample().unwrap().total, u64::MAX);
    assert!(matches!(c.inc(1).unwrap_err(), MetricError::Overflow(_)));
    assert_eq!(c.sample().unwrap().total, u64::MAX);
  }

  #[test]
  fn exemplar_is_recorded_and_reported() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let c = Counter::new(&arena).unwrap();
    let mut labels = BTreeMap::new();
    labels.insert("trace_id".to_string(), "abc123".to_string());
    c.inc_with_exemplar(3, Some(&labels)).unwrap();
    let sample = c.sample().unwrap();
    assert_eq!(sample.total, 3);
    let exemplar = sample.exemplar.unwrap();
    assert_eq!(exemplar.value, 3.0);
    assert_eq!(exemplar.labels.get("trace_id").unwrap(), "abc123");
  }
}
