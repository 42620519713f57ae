//! Metric primitives: Counter, Gauge, Summary, Histogram, Enum.
//!
//! Each submodule owns one arena-resident `struct_layout!` type plus its
//! inherent methods; [`registry::Collector`] and
//! [`registry::LabeledCollector`] (in `crate::registry`) are the only things
//! that turn a metric into the external [`MetricFamily`]/[`Sample`] shape
//! below. A metric only knows how to sample itself; naming, labels, and the
//! collector surface all live in the registry.

pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod state_set;
pub mod summary;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The closed sum of metric kinds this crate knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
  Counter,
  Gauge,
  Summary,
  Histogram,
  Enum,
}

/// `(labels, value, timestamp_seconds)` attached to a counter increment or
/// histogram bucket observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
  pub labels: BTreeMap<String, String>,
  pub value: f64,
  pub timestamp: f64,
}

/// One logical sample: `(name, labels, value, exemplar?)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
  pub name: String,
  pub labels: BTreeMap<String, String>,
  pub value: f64,
  pub exemplar: Option<Exemplar>,
}

impl Sample {
  pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>, value: f64) -> Self {
    Self {
      name: name.into(),
      labels,
      value,
      exemplar: None,
    }
  }

  pub fn with_exemplar(mut self, exemplar: Option<Exemplar>) -> Self {
    self.exemplar = exemplar;
    self
  }
}

/// `describe()`/`collect()` both yield these.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
  pub name: String,
  pub help: String,
  pub metric_type: MetricType,
  pub samples: Vec<Sample>,
}

/// Wall-clock seconds since the Unix epoch, used for `created` timestamps
/// and exemplar timestamps. Falls back to `0.0` rather than panicking if the
/// system clock is set before the epoch, since a metric's `created` sample
/// being slightly wrong is never worth aborting an increment over.
pub(crate) fn now_seconds() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}
