//! Error types for the crate, grouped by the surface that raises them:
//! construction-time configuration checks, per-call argument checks, 64-bit
//! overflow, and the interprocess lock.
//!
//! None of these use `thiserror`: each is a plain struct/enum with a hand
//! written `Display` and `std::error::Error` impl.

use core::fmt;

/// Raised at construction time: invalid names, bad alignment, malformed
/// histogram buckets, and other checks that only need to run once per
/// metric family rather than once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// A metric, subsystem, or namespace name did not match
  /// `[a-zA-Z_:][a-zA-Z0-9_:]*`.
  InvalidName(String),
  /// A label name did not match `[a-zA-Z_][a-zA-Z0-9_]*`.
  InvalidLabelName(String),
  /// A label name starting with `__` was used.
  ReservedLabelName(String),
  /// A label name collided with one a metric kind reserves for itself
  /// (`quantile`, `le`, or the Enum's own metric name).
  ReservedByMetric(String),
  /// `map_size` was not a power of two, or not a multiple of the OS
  /// allocation granularity.
  InvalidMapSize(usize),
  /// An alignment argument to `Arena::malloc` was not a power of two.
  InvalidAlignment(u32),
  /// Histogram thresholds were not sorted, or fewer than two were given.
  InvalidBuckets(&'static str),
  /// Enum was constructed with an empty state list.
  EmptyStates,
  /// A unit was given to a metric kind that does not support one
  /// (Info/Stateset equivalents).
  UnitNotAllowed(&'static str),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidName(n) => write!(f, "invalid metric name {n:?}"),
      Self::InvalidLabelName(n) => write!(f, "invalid label {n:?}"),
      Self::ReservedLabelName(n) => write!(f, "reserved label {n:?}"),
      Self::ReservedByMetric(n) => write!(f, "reserved label {n:?}"),
      Self::InvalidMapSize(n) => {
        write!(f, "map_size {n} must be a power of two and a multiple of the allocation granularity")
      }
      Self::InvalidAlignment(a) => write!(f, "alignment {a} is not a power of 2"),
      Self::InvalidBuckets(why) => write!(f, "invalid histogram buckets: {why}"),
      Self::EmptyStates => write!(f, "enum states must be non-empty"),
      Self::UnitNotAllowed(kind) => write!(f, "{kind} metrics cannot have a unit"),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Raised per call, on bad arguments to an already-constructed metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
  /// `Counter::inc`/`Histogram::observe` was called with a negative amount.
  NegativeAmount,
  /// `Enum::state` was called with a name outside the declared state list.
  UnknownState(String),
  /// `labels()` was called with a number of positional values that does
  /// not match the declared label names.
  LabelArityMismatch { expected: usize, got: usize },
  /// `labels()` was called with keyword labels whose names do not match
  /// the declared label names.
  LabelNameMismatch,
}

impl fmt::Display for ArgumentError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NegativeAmount => write!(f, "amount must be positive"),
      Self::UnknownState(s) => write!(f, "unknown state {s:?}"),
      Self::LabelArityMismatch { expected, got } => {
        write!(f, "incorrect label count: expected {expected}, got {got}")
      }
      Self::LabelNameMismatch => write!(f, "incorrect label names"),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for ArgumentError {}

/// Returned by `Atomic{Int64,UInt64,Double}::add` when `raise_on_overflow`
/// is true and the bit-level sum differs from the mathematical sum. The
/// atomic cell is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowError;

impl fmt::Display for OverflowError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "add would overflow")
  }
}

#[cfg(feature = "std")]
impl std::error::Error for OverflowError {}

/// Raised by the interprocess lock: "not supported" (timeout not
/// implementable on this platform) or "permission denied" (release
/// without hold).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
  /// The requested operation (e.g. a timed acquire) is not implementable
  /// by the platform's mutex primitive.
  NotSupported,
  /// `release()` was called by a thread that does not hold the lock.
  PermissionDenied,
  /// The lock's prior holder terminated while holding it and the
  /// platform could not mark the mutex consistent again.
  Poisoned,
}

impl fmt::Display for LockError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotSupported => write!(f, "operation not supported by this platform's mutex"),
      Self::PermissionDenied => write!(f, "release of a lock not held by this thread"),
      Self::Poisoned => write!(f, "lock holder terminated and could not be recovered"),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for LockError {}

/// The error type every metric write/sample method returns: a call can fail
/// on bad input, on a 64-bit overflow, or (rarely, only if the platform
/// lacks lock robustness) on a poisoned interprocess lock. A single metric
/// call can hit any of the three, so this folds them into one enum rather
/// than making every call site match three separate `Result`s.
#[derive(Debug)]
pub enum MetricError {
  Argument(ArgumentError),
  Overflow(OverflowError),
  Lock(LockError),
  /// A labeled child metric had to be allocated on a `labels()` cache miss
  /// and construction itself failed. Kind-specific argument validation
  /// always happens at family construction time, so in practice this can
  /// only be an [`ConstructError::Arena`] out-of-space failure.
  Construct(ConstructError),
}

impl fmt::Display for MetricError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Argument(e) => fmt::Display::fmt(e, f),
      Self::Overflow(e) => fmt::Display::fmt(e, f),
      Self::Lock(e) => fmt::Display::fmt(e, f),
      Self::Construct(e) => fmt::Display::fmt(e, f),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for MetricError {}

impl From<ArgumentError> for MetricError {
  fn from(e: ArgumentError) -> Self {
    Self::Argument(e)
  }
}

impl From<OverflowError> for MetricError {
  fn from(e: OverflowError) -> Self {
    Self::Overflow(e)
  }
}

impl From<LockError> for MetricError {
  fn from(e: LockError) -> Self {
    Self::Lock(e)
  }
}

impl From<ConstructError> for MetricError {
  fn from(e: ConstructError) -> Self {
    Self::Construct(e)
  }
}

/// Returned by a metric kind's own constructor (`Histogram::new`,
/// `Enum::new`, ...), which validates kind-specific arguments (bucket
/// thresholds, state lists) before ever touching the arena.
#[derive(Debug)]
pub enum ConstructError {
  Config(ConfigError),
  Arena(crate::arena::ArenaError),
}

impl fmt::Display for ConstructError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Config(e) => fmt::Display::fmt(e, f),
      Self::Arena(e) => fmt::Display::fmt(e, f),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for ConstructError {}

impl From<ConfigError> for ConstructError {
  fn from(e: ConfigError) -> Self {
    Self::Config(e)
  }
}

impl From<crate::arena::ArenaError> for ConstructError {
  fn from(e: crate::arena::ArenaError) -> Self {
    Self::Arena(e)
  }
}
