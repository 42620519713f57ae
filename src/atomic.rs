//! 64-bit atomics over shared memory.
//!
//! Three logical types — `AtomicInt64`, `AtomicUInt64`, `AtomicDouble` — each
//! occupy 8 bytes and support `get`/`set`/`add` with sequentially-consistent
//! ordering observable across processes. `add` reports overflow (bit-level
//! sum differing from the mathematical sum) and, when `raise_on_overflow` is
//! true, leaves the cell unchanged and returns [`OverflowError`] instead of
//! the prior value.
//!
//! On targets without native 64-bit atomics, [`locking`] provides the same
//! contract via a per-cell [`crate::lock::RawMutex`]. Callers cannot tell
//! the two implementations apart.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::OverflowError;
use crate::layout::Layout;

/// A signed 64-bit integer cell shared across processes.
#[repr(transparent)]
pub struct AtomicInt64(AtomicI64);

/// An unsigned 64-bit integer cell shared across processes.
#[repr(transparent)]
pub struct AtomicUInt64(AtomicU64);

/// An IEEE-754 binary64 cell shared across processes, stored as its raw bit
/// pattern in an `AtomicU64` so that adds can be expressed as a
/// compare-and-swap loop.
#[repr(transparent)]
pub struct AtomicDouble(AtomicU64);

macro_rules! impl_native_atomic {
  ($name:ident, $repr:ty, $raw:ty) => {
    impl $name {
      #[inline]
      pub fn get(&self) -> $repr {
        self.0.load(Ordering::SeqCst)
      }

      #[inline]
      pub fn set(&self, value: $repr) {
        self.0.store(value, Ordering::SeqCst);
      }
    }

    unsafe impl Layout for $name {
      const SIZE: usize = core::mem::size_of::<$raw>();
      const ALIGN: usize = core::mem::align_of::<$raw>();

      fn init(bytes: &mut [u8]) {
        debug_assert_eq!(bytes.len(), Self::SIZE);
        unsafe {
          (bytes.as_mut_ptr() as *mut $raw).write(0);
        }
      }
    }
  };
}

impl_native_atomic!(AtomicInt64, i64, i64);
impl_native_atomic!(AtomicUInt64, u64, u64);

impl AtomicInt64 {
  /// Atomically adds `delta`, returning the prior value. On signed overflow,
  /// the wrapped mathematical result is checked against the wrapping
  /// add; if `raise_on_overflow` the cell is restored to its pre-add value
  /// and [`OverflowError`] is returned instead.
  pub fn add(&self, delta: i64, raise_on_overflow: bool) -> Result<i64, OverflowError> {
    let prior = self.0.fetch_add(delta, Ordering::SeqCst);
    if prior.checked_add(delta).is_some() {
      Ok(prior)
    } else if raise_on_overflow {
      self.0.fetch_sub(delta, Ordering::SeqCst);
      Err(OverflowError)
    } else {
      Ok(prior)
    }
  }
}

impl AtomicUInt64 {
  /// Atomically adds `delta`, returning the prior value. Unsigned overflow
  /// is wraparound; if `raise_on_overflow` the cell is restored and
  /// [`OverflowError`] is returned instead of wrapping.
  pub fn add(&self, delta: u64, raise_on_overflow: bool) -> Result<u64, OverflowError> {
    let prior = self.0.fetch_add(delta, Ordering::SeqCst);
    if let Some(_expected) = prior.checked_add(delta) {
      Ok(prior)
    } else if raise_on_overflow {
      self.0.fetch_sub(delta, Ordering::SeqCst);
      Err(OverflowError)
    } else {
      Ok(prior)
    }
  }

  /// Atomically adds `delta`, never raising. The double-buffer ticket
  /// counter's hot-bit flip uses this: flipping the hot bit must always
  /// succeed, even if the low 63 bits of the counter wrap around.
  #[inline]
  pub fn fetch_add_wrapping(&self, delta: u64) -> u64 {
    self.0.fetch_add(delta, Ordering::SeqCst)
  }
}

impl AtomicDouble {
  #[inline]
  pub fn get(&self) -> f64 {
    f64::from_bits(self.0.load(Ordering::SeqCst))
  }

  #[inline]
  pub fn set(&self, value: f64) {
    self.0.store(value.to_bits(), Ordering::SeqCst);
  }

  /// Atomically adds `delta` via a compare-and-swap loop (there is no
  /// hardware fetch-add for floats). Overflow is defined as the result
  /// becoming non-finite (infinite or NaN) when both the prior value and
  /// `delta` were finite.
  pub fn add(&self, delta: f64, raise_on_overflow: bool) -> Result<f64, OverflowError> {
    let mut current = self.0.load(Ordering::SeqCst);
    loop {
      let old = f64::from_bits(current);
      let new = old + delta;
      if raise_on_overflow && !new.is_finite() && old.is_finite() && delta.is_finite() {
        return Err(OverflowError);
      }
      match self.0.compare_exchange_weak(
        current,
        new.to_bits(),
        Ordering::SeqCst,
        Ordering::SeqCst,
      ) {
        Ok(_) => return Ok(old),
        Err(observed) => current = observed,
      }
    }
  }
}

unsafe impl Layout for AtomicDouble {
  const SIZE: usize = core::mem::size_of::<u64>();
  const ALIGN: usize = core::mem::align_of::<u64>();

  fn init(bytes: &mut [u8]) {
    debug_assert_eq!(bytes.len(), Self::SIZE);
    unsafe {
      (bytes.as_mut_ptr() as *mut u64).write(0.0f64.to_bits());
    }
  }
}

/// Lock-backed fallback atomics for platforms lacking native 64-bit atomic
/// instructions, selected in place of the native types above via
/// `#[cfg(not(target_has_atomic = "64"))]` at the call site. Each cell pairs
/// a [`RawMutex`] with a plain scalar and performs every operation under the
/// lock, giving the same observable semantics as the native types at the
/// cost of a lock/unlock per access.
pub mod locking {
  use crate::error::OverflowError;
  use crate::layout::{struct_layout, Layout, Scalar};
  use crate::lock::{InterprocessLock, RawMutex};

  macro_rules! locking_atomic {
    ($name:ident, $repr:ty) => {
      struct_layout! {
        pub struct $name {
          lock: RawMutex,
          value: Scalar<$repr>,
        }
      }

      impl $name {
        pub fn get(&self) -> $repr {
          let _g = self.lock.lock().expect("interprocess lock");
          self.value.get()
        }

        pub fn set(&self, v: $repr) {
          let _g = self.lock.lock().expect("interprocess lock");
          self.value.set(v);
        }

        pub fn add(&self, delta: $repr, raise_on_overflow: bool) -> Result<$repr, OverflowError> {
          let _g = self.lock.lock().expect("interprocess lock");
          let old = self.value.get();
          let new = old + delta;
          if raise_on_overflow && new == old && delta != Default::default() {
            return Err(OverflowError);
          }
          self.value.set(new);
          Ok(old)
        }
      }
    };
  }

  locking_atomic!(LockingInt64, i64);
  locking_atomic!(LockingUInt64, u64);
  locking_atomic!(LockingDouble, f64);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uint64_set_get_roundtrip() {
    let mut bytes = vec![0u8; AtomicUInt64::SIZE];
    AtomicUInt64::init(&mut bytes);
    let v = AtomicUInt64::view(&bytes);
    v.set(42);
    assert_eq!(v.get(), 42);
  }

  #[test]
  fn uint64_add_returns_prior() {
    let mut bytes = vec![0u8; AtomicUInt64::SIZE];
    AtomicUInt64::init(&mut bytes);
    let v = AtomicUInt64::view(&bytes);
    v.set(10);
    let prior = v.add(5, true).unwrap();
    assert_eq!(prior, 10);
    assert_eq!(v.get(), 15);
  }

  #[test]
  fn uint64_add_overflow_leaves_value_unchanged() {
    let mut bytes = vec![0u8; AtomicUInt64::SIZE];
    AtomicUInt64::init(&mut bytes);
    let v = AtomicUInt64::view(&bytes);
    v.set(u64::MAX);
    let err = v.add(1, true).unwrap_err();
    let _ = err;
    assert_eq!(v.get(), u64::MAX);
  }

  #[test]
  fn uint64_add_overflow_wraps_when_not_raising() {
    let mut bytes = vec![0u8; AtomicUInt64::SIZE];
    AtomicUInt64::init(&mut bytes);
    let v = AtomicUInt64::view(&bytes);
    v.set(u64::MAX);
    let prior = v.add(1, false).unwrap();
    assert_eq!(prior, u64::MAX);
    assert_eq!(v.get(), 0);
  }

  #[test]
  fn int64_signed_overflow_detected() {
    let mut bytes = vec![0u8; AtomicInt64::SIZE];
    AtomicInt64::init(&mut bytes);
    let v = AtomicInt64::view(&bytes);
    v.set(i64::MAX);
    assert!(v.add(1, true).is_err());
    assert_eq!(v.get(), i64::MAX);
  }

  #[test]
  fn double_add_roundtrip() {
    let mut bytes = vec![0u8; AtomicDouble::SIZE];
    AtomicDouble::init(&mut bytes);
    let v = AtomicDouble::view(&bytes);
    v.add(1.5, true).unwrap();
    v.add(2.25, true).unwrap();
    assert_eq!(v.get(), 3.75);
  }

  #[test]
  fn double_overflow_to_infinity_is_detected() {
    let mut bytes = vec![0u8; AtomicDouble::SIZE];
    AtomicDouble::init(&mut bytes);
    let v = AtomicDouble::view(&bytes);
    v.set(f64::MAX);
    assert!(v.add(f64::MAX, true).is_err());
    assert_eq!(v.get(), f64::MAX);
  }

  #[test]
  fn concurrent_adds_are_ordered_across_threads() {
    use std::thread;

    // Leak into 'static so worker threads can share references freely;
    // this is a test fixture, not a production allocation path (real
    // callers share cells via arena blocks instead).
    let xb: &'static mut [u8] = Box::leak(vec![0u8; AtomicUInt64::SIZE].into_boxed_slice());
    let yb: &'static mut [u8] = Box::leak(vec![0u8; AtomicUInt64::SIZE].into_boxed_slice());
    AtomicUInt64::init(xb);
    AtomicUInt64::init(yb);
    let x: &'static AtomicUInt64 = AtomicUInt64::view(xb);
    let y: &'static AtomicUInt64 = AtomicUInt64::view(yb);

    let workers: Vec<_> = (0..4)
      .map(|_| {
        thread::spawn(move || {
          for _ in 0..10_000 {
            x.add(1, false).unwrap();
            y.add(1, false).unwrap();
          }
        })
      })
      .collect();

    for w in workers {
      w.join().unwrap();
    }

    assert_eq!(x.get(), 40_000);
    assert_eq!(y.get(), 40_000);
  }

  #[test]
  fn observer_never_sees_y_ahead_of_x() {
    // `y` is only ever bumped after `x` in each worker's loop, so an
    // observer reading `y` first and `x` second can never catch `y` ahead
    // of `x`.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use wg::WaitGroup;

    let xb: &'static mut [u8] = Box::leak(vec![0u8; AtomicUInt64::SIZE].into_boxed_slice());
    let yb: &'static mut [u8] = Box::leak(vec![0u8; AtomicUInt64::SIZE].into_boxed_slice());
    AtomicUInt64::init(xb);
    AtomicUInt64::init(yb);
    let x: &'static AtomicUInt64 = AtomicUInt64::view(xb);
    let y: &'static AtomicUInt64 = AtomicUInt64::view(yb);

    let stop = Box::leak(Box::new(AtomicBool::new(false)));
    let wg = WaitGroup::new();

    for _ in 0..4 {
      let wg = wg.add(1);
      thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
          x.add(1, false).unwrap();
          y.add(1, false).unwrap();
        }
        wg.done();
      });
    }

    for _ in 0..20_000 {
      let y_obs = y.get();
      let x_obs = x.get();
      assert!(x_obs >= y_obs, "observed y={y_obs} ahead of x={x_obs}");
    }

    stop.store(true, Ordering::Relaxed);
    wg.wait();
  }
}
