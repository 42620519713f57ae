//! Multiprocess-safe OpenMetrics/Prometheus instrumentation primitives
//! backed by a shared-memory arena.
//!
//! A [`registry::Registry`] holds the collectors built by the constructor
//! functions in [`registry`] (`counter`, `gauge`, `summary`, `histogram`,
//! `state_set`). Every metric a process constructs — or attaches to, via
//! [`registry::LabeledCollector::labels`] — lives in an [`arena::Arena`]
//! shared with every other process forked from the one that created it;
//! incrementing a counter in a child process is visible to
//! [`registry::Registry::collect`] called from the parent, with no IPC on
//! the hot path.
//!
//! ```
//! use mpmetrics::registry::Registry;
//!
//! let registry = Registry::new();
//! let arena = mpmetrics::arena::Arena::create_anonymous(1 << 16).unwrap();
//! let requests = mpmetrics::registry::counter(
//!     &registry, &arena, "requests_total", "count of requests", &[], "", "", "",
//! ).unwrap();
//! requests.labels(either::Either::Left(vec![])).unwrap().inc(1).unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod arena;
pub mod atomic;
pub mod container;
pub mod error;
pub mod layout;
pub mod lock;
pub mod metrics;
pub mod registry;
mod util;

pub use arena::{Arena, ArenaError, Block};
pub use error::{ArgumentError, ConfigError, ConstructError, LockError, MetricError, OverflowError};
pub use metrics::{counter::Counter, gauge::Gauge, histogram::Histogram, state_set::Enum, summary::Summary};
pub use metrics::{Exemplar, MetricFamily, MetricType, Sample};
pub use registry::{Collector, LabeledCollector, Registry};
