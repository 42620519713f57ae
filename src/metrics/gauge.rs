//! A point-in-time value that can move up or down, backed by a single
//! shared-memory double.

use crate::arena::{Arena, ArenaError};
use crate::atomic::AtomicDouble;
use crate::error::MetricError;
use crate::layout::{struct_layout, Boxed};

use super::now_seconds;

struct_layout! {
  pub struct GaugeData {
    value: AtomicDouble,
  }
}

/// A point-in-time value that can go up or down.
pub struct Gauge {
  data: Boxed<GaugeData>,
}

impl Gauge {
  pub(crate) fn new(arena: &Arena) -> Result<Self, ArenaError> {
    Ok(Self {
      data: Boxed::new(arena)?,
    })
  }

  pub(crate) fn attach(arena: &Arena, block: crate::arena::Block) -> Self {
    Self {
      data: Boxed::from_block(arena, block),
    }
  }

  pub(crate) fn block(&self) -> &crate::arena::Block {
    self.data.block()
  }

  pub fn inc(&self, amount: f64) -> Result<(), MetricError> {
    self.data.value.add(amount, true)?;
    Ok(())
  }

  pub fn dec(&self, amount: f64) -> Result<(), MetricError> {
    self.data.value.add(-amount, true)?;
    Ok(())
  }

  pub fn set(&self, value: f64) {
    self.data.value.set(value);
  }

  /// Writes the current wall-clock time as the gauge's value.
  pub fn set_to_current_time(&self) {
    self.data.value.set(now_seconds());
  }

  /// `inc(1)` now, `dec(1)` when the returned guard drops. Useful for
  /// tracking the number of in-flight operations.
  pub fn track_inprogress(&self) -> InProgressGuard<'_> {
    let _ = self.data.value.add(1.0, false);
    InProgressGuard { gauge: self }
  }

  pub(crate) fn sample(&self) -> f64 {
    self.data.value.get()
  }
}

/// RAII handle returned by [`Gauge::track_inprogress`]; decrements the gauge
/// on drop.
pub struct InProgressGuard<'a> {
  gauge: &'a Gauge,
}

impl Drop for InProgressGuard<'_> {
  fn drop(&mut self) {
    let _ = self.gauge.data.value.add(-1.0, false);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inc_dec_set_roundtrip() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let g = Gauge::new(&arena).unwrap();
    assert_eq!(g.sample(), 0.0);
    g.inc(5.0).unwrap();
    g.dec(2.0).unwrap();
    assert_eq!(g.sample(), 3.0);
    g.set(10.0);
    assert_eq!(g.sample(), 10.0);
  }

  #[test]
  fn set_to_current_time_is_recent() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let g = Gauge::new(&arena).unwrap();
    g.set_to_current_time();
    assert!(g.sample() > 0.0);
  }

  #[test]
  fn track_inprogress_increments_then_decrements_on_drop() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let g = Gauge::new(&arena).unwrap();
    {
      let _guard = g.track_inprogress();
      assert_eq!(g.sample(), 1.0);
    }
    assert_eq!(g.sample(), 0.0);
  }
}
