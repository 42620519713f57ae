//! Label registry / Collector: name and label validation, the
//! positional/keyword `labels()` resolution, and the process-local cache
//! over an arena-resident label-tuple map.
//!
//! Every labeled metric, including one with zero declared labels, goes
//! through the same `labels()`/child-cache machinery; an empty-arity metric
//! simply has one child keyed by the empty tuple. One mechanism covers both
//! cases rather than duplicating every kind behind both a labeled and
//! unlabeled wrapper type.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use either::Either;
use parking_lot::Mutex;
use regex::Regex;

use crate::arena::{Arena, Block};
use crate::container::{Dict, ObjectHeader};
use crate::error::{ArgumentError, ConfigError, ConstructError, MetricError};
use crate::layout::{struct_layout, Boxed, Layout};
use crate::lock::{InterprocessLock, RawMutex};
use crate::metrics::counter::{Counter, CounterSample};
use crate::metrics::gauge::Gauge;
use crate::metrics::histogram::{Histogram, HistogramSample};
use crate::metrics::state_set::Enum;
use crate::metrics::summary::{Summary, SummarySample};
use crate::metrics::{Exemplar, MetricFamily, MetricType, Sample};

fn name_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap())
}

fn label_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap())
}

/// Joins the non-empty parts of `namespace`, `subsystem`, `name`, applies
/// the counter `_total`/unit-suffix rules, and validates the result against
/// the OpenMetrics name grammar.
fn build_name(
  metric_type: MetricType,
  name: &str,
  namespace: &str,
  subsystem: &str,
  unit: &str,
) -> Result<String, ConfigError> {
  if !unit.is_empty() && matches!(metric_type, MetricType::Enum) {
    return Err(ConfigError::UnitNotAllowed("enum"));
  }

  let mut name = name.to_string();
  if matches!(metric_type, MetricType::Counter) && name.ends_with("_total") {
    name.truncate(name.len() - "_total".len());
  }
  if !unit.is_empty() {
    let suffix = format!("_{unit}");
    if name.ends_with(&suffix) {
      name.truncate(name.len() - suffix.len());
    }
  }

  let mut parts: Vec<&str> = Vec::new();
  if !namespace.is_empty() {
    parts.push(namespace);
  }
  if !subsystem.is_empty() {
    parts.push(subsystem);
  }
  parts.push(&name);
  let mut full_name = parts.join("_");

  if !unit.is_empty() {
    full_name.push('_');
    full_name.push_str(unit);
  }
  if matches!(metric_type, MetricType::Counter) {
    full_name.push_str("_total");
  }

  if !name_regex().is_match(&full_name) {
    return Err(ConfigError::InvalidName(full_name));
  }
  Ok(full_name)
}

/// Label names the given metric kind reserves for its own exposition.
/// Enum's reservation is handled separately in [`validate_labelnames`] since
/// it depends on the metric's own name rather than a fixed string.
fn reserved_label(metric_type: MetricType) -> Option<&'static str> {
  match metric_type {
    MetricType::Summary => Some("quantile"),
    MetricType::Histogram => Some("le"),
    _ => None,
  }
}

fn validate_labelnames(
  metric_type: MetricType,
  full_name: &str,
  labelnames: &[String],
) -> Result<(), ConfigError> {
  for n in labelnames {
    if !label_regex().is_match(n) {
      return Err(ConfigError::InvalidLabelName(n.clone()));
    }
    if n.starts_with("__") {
      return Err(ConfigError::ReservedLabelName(n.clone()));
    }
    if let Some(reserved) = reserved_label(metric_type) {
      if n == reserved {
        return Err(ConfigError::ReservedByMetric(n.clone()));
      }
    }
    if matches!(metric_type, MetricType::Enum) && n == full_name {
      return Err(ConfigError::ReservedByMetric(n.clone()));
    }
  }
  Ok(())
}

/// `describe()`/`collect()`, the surface a scrape endpoint consumes.
pub trait Collector: Send + Sync {
  fn describe(&self) -> Vec<MetricFamily>;
  fn collect(&self) -> Vec<MetricFamily>;
}

/// A flat set of registered collectors that every metric constructor
/// attaches itself to, and that `describe()`/`collect()` fan out over.
#[derive(Default)]
pub struct Registry {
  collectors: Mutex<Vec<Arc<dyn Collector>>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, collector: Arc<dyn Collector>) {
    self.collectors.lock().push(collector);
  }

  pub fn describe(&self) -> Vec<MetricFamily> {
    self.collectors.lock().iter().flat_map(|c| c.describe()).collect()
  }

  pub fn collect(&self) -> Vec<MetricFamily> {
    self.collectors.lock().iter().flat_map(|c| c.collect()).collect()
  }
}

/// The closed sum of metric kinds this registry knows how to build,
/// attach, sample, and render as OpenMetrics-shaped samples.
pub(crate) trait Kind: Sized {
  type Args: Clone + Send + Sync;
  type Sample;
  const TYPE: MetricType;

  fn construct(arena: &Arena, args: &Self::Args) -> Result<Self, ConstructError>;
  fn attach(arena: &Arena, block: Block, args: &Self::Args) -> Self;
  fn block(&self) -> &Block;
  fn sample(&self) -> Result<Self::Sample, MetricError>;
  fn emit(
    name: &str,
    labels: &BTreeMap<String, String>,
    args: &Self::Args,
    sample: Self::Sample,
  ) -> Vec<Sample>;
}

impl Kind for Counter {
  type Args = ();
  type Sample = CounterSample;
  const TYPE: MetricType = MetricType::Counter;

  fn construct(arena: &Arena, _args: &()) -> Result<Self, ConstructError> {
    Ok(Counter::new(arena)?)
  }

  fn attach(arena: &Arena, block: Block, _args: &()) -> Self {
    Counter::attach(arena, block)
  }

  fn block(&self) -> &Block {
    Counter::block(self)
  }

  fn sample(&self) -> Result<CounterSample, MetricError> {
    Counter::sample(self)
  }

  fn emit(name: &str, labels: &BTreeMap<String, String>, _args: &(), sample: CounterSample) -> Vec<Sample> {
    vec![
      Sample::new(name, labels.clone(), sample.total as f64).with_exemplar(sample.exemplar),
      Sample::new(format!("{name}_created"), labels.clone(), sample.created),
    ]
  }
}

impl Kind for Gauge {
  type Args = ();
  type Sample = f64;
  const TYPE: MetricType = MetricType::Gauge;

  fn construct(arena: &Arena, _args: &()) -> Result<Self, ConstructError> {
    Ok(Gauge::new(arena)?)
  }

  fn attach(arena: &Arena, block: Block, _args: &()) -> Self {
    Gauge::attach(arena, block)
  }

  fn block(&self) -> &Block {
    Gauge::block(self)
  }

  fn sample(&self) -> Result<f64, MetricError> {
    Ok(Gauge::sample(self))
  }

  fn emit(name: &str, labels: &BTreeMap<String, String>, _args: &(), sample: f64) -> Vec<Sample> {
    vec![Sample::new(name, labels.clone(), sample)]
  }
}

impl Kind for Summary {
  type Args = ();
  type Sample = SummarySample;
  const TYPE: MetricType = MetricType::Summary;

  fn construct(arena: &Arena, _args: &()) -> Result<Self, ConstructError> {
    Ok(Summary::new(arena)?)
  }

  fn attach(arena: &Arena, block: Block, _args: &()) -> Self {
    Summary::attach(arena, block)
  }

  fn block(&self) -> &Block {
    Summary::block(self)
  }

  fn sample(&self) -> Result<SummarySample, MetricError> {
    Summary::sample(self)
  }

  fn emit(name: &str, labels: &BTreeMap<String, String>, _args: &(), sample: SummarySample) -> Vec<Sample> {
    vec![
      Sample::new(format!("{name}_count"), labels.clone(), sample.count as f64)
        .with_exemplar(sample.exemplar),
      Sample::new(format!("{name}_sum"), labels.clone(), sample.sum),
      Sample::new(format!("{name}_created"), labels.clone(), sample.created),
    ]
  }
}

impl Kind for Histogram {
  type Args = Vec<f64>;
  type Sample = HistogramSample;
  const TYPE: MetricType = MetricType::Histogram;

  fn construct(arena: &Arena, args: &Vec<f64>) -> Result<Self, ConstructError> {
    Histogram::new(arena, Some(args.clone()))
  }

  fn attach(arena: &Arena, block: Block, args: &Vec<f64>) -> Self {
    Histogram::attach(arena, block, args.clone())
  }

  fn block(&self) -> &Block {
    Histogram::block(self)
  }

  fn sample(&self) -> Result<HistogramSample, MetricError> {
    Histogram::sample(self)
  }

  fn emit(
    name: &str,
    labels: &BTreeMap<String, String>,
    _args: &Vec<f64>,
    sample: HistogramSample,
  ) -> Vec<Sample> {
    let mut out = Vec::with_capacity(sample.thresholds.len() + 3);
    for ((le, cumulative), exemplar) in sample
      .thresholds
      .iter()
      .zip(sample.cumulative_counts.iter())
      .zip(sample.exemplars.into_iter())
    {
      let mut bucket_labels = labels.clone();
      bucket_labels.insert("le".to_string(), format_le(*le));
      out.push(
        Sample::new(format!("{name}_bucket"), bucket_labels, *cumulative as f64)
          .with_exemplar(exemplar),
      );
    }
    out.push(Sample::new(format!("{name}_count"), labels.clone(), sample.count as f64));
    out.push(Sample::new(format!("{name}_sum"), labels.clone(), sample.sum));
    out.push(Sample::new(format!("{name}_created"), labels.clone(), sample.created));
    out
  }
}

fn format_le(v: f64) -> String {
  if v.is_infinite() {
    "+Inf".to_string()
  } else {
    v.to_string()
  }
}

impl Kind for Enum {
  type Args = Vec<String>;
  type Sample = usize;
  const TYPE: MetricType = MetricType::Enum;

  fn construct(arena: &Arena, args: &Vec<String>) -> Result<Self, ConstructError> {
    Enum::new(arena, args.clone())
  }

  fn attach(arena: &Arena, block: Block, args: &Vec<String>) -> Self {
    Enum::attach(arena, block, args.clone())
  }

  fn block(&self) -> &Block {
    Enum::block(self)
  }

  fn sample(&self) -> Result<usize, MetricError> {
    Ok(Enum::sample(self))
  }

  fn emit(name: &str, labels: &BTreeMap<String, String>, args: &Vec<String>, selected: usize) -> Vec<Sample> {
    args
      .iter()
      .enumerate()
      .map(|(i, state)| {
        let mut l = labels.clone();
        l.insert(name.to_string(), state.clone());
        Sample::new(name, l, if i == selected { 1.0 } else { 0.0 })
      })
      .collect()
  }
}

struct_layout! {
  /// One per metric family: guards the arena-resident label-tuple map.
  pub struct FamilyHeader {
    lock: RawMutex,
    shared_map: ObjectHeader,
  }
}

/// Owns a metric family's shared label-tuple map and a process-local cache
/// over it. A family declared with zero label names simply has exactly one
/// child, keyed by the empty tuple.
pub struct LabeledCollector<K: Kind> {
  arena: Arena,
  name: String,
  help: String,
  labelnames: Vec<String>,
  args: K::Args,
  header: Boxed<FamilyHeader>,
  local_cache: Mutex<HashMap<Vec<String>, Arc<K>>>,
}

impl<K: Kind> LabeledCollector<K> {
  fn new(
    arena: Arena,
    name: String,
    help: String,
    labelnames: Vec<String>,
    args: K::Args,
  ) -> Result<Self, ConstructError> {
    let header = Boxed::new(&arena)?;
    Ok(Self {
      arena,
      name,
      help,
      labelnames,
      args,
      header,
      local_cache: Mutex::new(HashMap::new()),
    })
  }

  fn shared_map(&self) -> Dict<Vec<String>, (u64, u32)> {
    Dict::new(&self.header.shared_map, &self.arena)
  }

  /// Resolves (allocating on first use) the child for a label tuple given
  /// either all positional values or all keyword values. The two forms are
  /// mutually exclusive by construction: `Either` only ever holds one of
  /// its two variants, so there is no call site capable of supplying both
  /// at once, and no "mixed" form to reject.
  pub fn labels(
    &self,
    args: Either<Vec<String>, BTreeMap<String, String>>,
  ) -> Result<Arc<K>, MetricError> {
    let values = match args {
      Either::Left(positional) => {
        if positional.len() != self.labelnames.len() {
          return Err(
            ArgumentError::LabelArityMismatch {
              expected: self.labelnames.len(),
              got: positional.len(),
            }
            .into(),
          );
        }
        positional
      }
      Either::Right(keyword) => {
        if keyword.len() != self.labelnames.len()
          || !self.labelnames.iter().all(|n| keyword.contains_key(n))
        {
          return Err(ArgumentError::LabelNameMismatch.into());
        }
        self.labelnames.iter().map(|n| keyword[n].clone()).collect()
      }
    };
    self.resolve(values)
  }

  fn resolve(&self, values: Vec<String>) -> Result<Arc<K>, MetricError> {
    if let Some(existing) = self.local_cache.lock().get(&values) {
      return Ok(Arc::clone(existing));
    }

    let _guard = self.header.lock.lock()?;
    let shared_map = self.shared_map();
    let child = match shared_map.get(&values) {
      Some((start, size)) => {
        Arc::new(K::attach(&self.arena, self.arena.block_at(start, size), &self.args))
      }
      None => {
        let metric = K::construct(&self.arena, &self.args)?;
        let coords = (metric.block().start(), metric.block().size());
        shared_map.insert(values.clone(), coords);
        Arc::new(metric)
      }
    };
    self.local_cache.lock().insert(values, Arc::clone(&child));
    Ok(child)
  }

  fn collect_samples(&self) -> Vec<Sample> {
    if let Ok(guard) = self.header.lock.lock() {
      let snapshot = self.shared_map().snapshot();
      let mut cache = self.local_cache.lock();
      for (values, (start, size)) in snapshot {
        cache
          .entry(values)
          .or_insert_with(|| Arc::new(K::attach(&self.arena, self.arena.block_at(start, size), &self.args)));
      }
      drop(guard);
    }

    let cache = self.local_cache.lock();
    let mut out = Vec::new();
    for (values, metric) in cache.iter() {
      let labels: BTreeMap<String, String> = self
        .labelnames
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect();
      match metric.sample() {
        Ok(sample) => out.extend(K::emit(&self.name, &labels, &self.args, sample)),
        Err(_e) => {
          #[cfg(feature = "tracing")]
          tracing::warn!(metric = %self.name, error = %_e, "failed to sample metric; skipping");
        }
      }
    }
    out
  }
}

impl<K: Kind> Collector for LabeledCollector<K> {
  fn describe(&self) -> Vec<MetricFamily> {
    vec![MetricFamily {
      name: self.name.clone(),
      help: self.help.clone(),
      metric_type: K::TYPE,
      samples: Vec::new(),
    }]
  }

  fn collect(&self) -> Vec<MetricFamily> {
    vec![MetricFamily {
      name: self.name.clone(),
      help: self.help.clone(),
      metric_type: K::TYPE,
      samples: self.collect_samples(),
    }]
  }
}

fn labelnames_of(labelnames: &[&str]) -> Vec<String> {
  labelnames.iter().map(|s| s.to_string()).collect()
}

/// Constructs and registers a Counter family: `name`, `help` text, optional
/// `labelnames`, and the usual namespace/subsystem/unit decorations.
pub fn counter(
  registry: &Registry,
  arena: &Arena,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  unit: &str,
) -> Result<Arc<LabeledCollector<Counter>>, ConstructError> {
  build_family(registry, arena.clone(), MetricType::Counter, name, help, labelnames, namespace, subsystem, unit, ())
}

pub fn gauge(
  registry: &Registry,
  arena: &Arena,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  unit: &str,
) -> Result<Arc<LabeledCollector<Gauge>>, ConstructError> {
  build_family(registry, arena.clone(), MetricType::Gauge, name, help, labelnames, namespace, subsystem, unit, ())
}

pub fn summary(
  registry: &Registry,
  arena: &Arena,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  unit: &str,
) -> Result<Arc<LabeledCollector<Summary>>, ConstructError> {
  build_family(registry, arena.clone(), MetricType::Summary, name, help, labelnames, namespace, subsystem, unit, ())
}

#[allow(clippy::too_many_arguments)]
pub fn histogram(
  registry: &Registry,
  arena: &Arena,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  unit: &str,
  buckets: Option<Vec<f64>>,
) -> Result<Arc<LabeledCollector<Histogram>>, ConstructError> {
  let thresholds = crate::metrics::histogram::DEFAULT_BUCKETS
    .to_vec();
  let thresholds = buckets.unwrap_or(thresholds);
  build_family(
    registry, arena.clone(), MetricType::Histogram, name, help, labelnames, namespace, subsystem, unit, thresholds,
  )
}

#[allow(clippy::too_many_arguments)]
pub fn state_set(
  registry: &Registry,
  arena: &Arena,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  states: Vec<String>,
) -> Result<Arc<LabeledCollector<Enum>>, ConstructError> {
  build_family(
    registry, arena.clone(), MetricType::Enum, name, help, labelnames, namespace, subsystem, "", states,
  )
}

#[allow(clippy::too_many_arguments)]
fn build_family<K: Kind>(
  registry: &Registry,
  arena: Arena,
  metric_type: MetricType,
  name: &str,
  help: &str,
  labelnames: &[&str],
  namespace: &str,
  subsystem: &str,
  unit: &str,
  args: K::Args,
) -> Result<Arc<LabeledCollector<K>>, ConstructError> {
  let full_name = build_name(metric_type, name, namespace, subsystem, unit)?;
  let labelnames = labelnames_of(labelnames);
  validate_labelnames(metric_type, &full_name, &labelnames)?;

  let collector = Arc::new(LabeledCollector::<K>::new(arena, full_name, help.to_string(), labelnames, args)?);
  registry.register(collector.clone());
  Ok(collector)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counter_name_gets_total_suffix_once() {
    let registry = Registry::new();
    let arena = Arena::create_anonymous(1 << 16).unwrap();
    let c = counter(&registry, &arena, "c_total", "help text", &[], "", "", "").unwrap();
    c.labels(Either::Left(vec![])).unwrap().inc(8).unwrap();

    let families = registry.collect();
    assert_eq!(families.len(), 1);
    let sample = families[0].samples.iter().find(|s| s.name == "c_total").unwrap();
    assert_eq!(sample.value, 8.0);
  }

  #[test]
  fn labeled_counter_accumulates_under_positional_and_keyword_forms() {
    let registry = Registry::new();
    let arena = Arena::create_anonymous(1 << 16).unwrap();
    let c = counter(&registry, &arena, "c_total", "h", &["l"], "", "", "").unwrap();

    c.labels(Either::Left(vec!["x".to_string()])).unwrap().inc(1).unwrap();
    let mut kw = BTreeMap::new();
    kw.insert("l".to_string(), "x".to_string());
    c.labels(Either::Right(kw)).unwrap().inc(1).unwrap();

    let families = registry.collect();
    let sample = families[0]
      .samples
      .iter()
      .find(|s| s.name == "c_total" && s.labels.get("l").map(String::as_str) == Some("x"))
      .unwrap();
    assert_eq!(sample.value, 2.0);

    assert!(matches!(
      c.labels(Either::Left(vec![])).unwrap_err(),
      MetricError::Argument(ArgumentError::LabelArityMismatch { .. })
    ));
    assert!(matches!(
      c.labels(Either::Left(vec!["a".to_string(), "b".to_string()]))
        .unwrap_err(),
      MetricError::Argument(ArgumentError::LabelArityMismatch { .. })
    ));
  }

  #[test]
  fn enum_samples_one_per_state() {
    let registry = Registry::new();
    let arena = Arena::create_anonymous(1 << 16).unwrap();
    let e = state_set(
      &registry,
      &arena,
      "task_state",
      "h",
      &[],
      "",
      "",
      vec!["a".to_string(), "b".to_string(), "c".to_string()],
    )
    .unwrap();
    e.labels(Either::Left(vec![])).unwrap().state("b").unwrap();

    let families = registry.collect();
    let samples = &families[0].samples;
    assert_eq!(samples.len(), 3);
    let value_for = |state: &str| {
      samples
        .iter()
        .find(|s| s.labels.get("task_state").map(String::as_str) == Some(state))
        .unwrap()
        .value
    };
    assert_eq!(value_for("a"), 0.0);
    assert_eq!(value_for("b"), 1.0);
    assert_eq!(value_for("c"), 0.0);
  }

  #[test]
  fn reserved_label_names_are_rejected() {
    let registry = Registry::new();
    let arena = Arena::create_anonymous(1 << 16).unwrap();
    assert!(matches!(
      histogram(&registry, &arena, "h", "help", &["le"], "", "", "", None).unwrap_err(),
      ConstructError::Config(ConfigError::ReservedByMetric(_))
    ));
  }
}
