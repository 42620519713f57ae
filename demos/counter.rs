//! Single-process walkthrough: build a registry, register a labeled
//! counter, increment it, and print what `collect()` would hand an
//! exposition encoder. The multiprocess analogue of this demo's scenario in
//! the original Python library (`examples/readme.py`) decorates a function
//! with a `Summary` and serves it over HTTP; the HTTP server and exposition
//! format are both out of scope for this crate (see spec.md section 1), so
//! this demo stops at the `collect()` boundary.

use either::Either;
use mpmetrics::registry::{counter, Registry};

fn main() {
  let registry = Registry::new();
  let arena = mpmetrics::Arena::create_anonymous(1 << 16).expect("create arena");

  let requests = counter(
    &registry,
    &arena,
    "http_requests_total",
    "Total number of HTTP requests processed",
    &["route"],
    "",
    "",
    "",
  )
  .expect("construct counter");

  for route in ["/one", "/two", "/three"] {
    requests
      .labels(Either::Left(vec![route.to_string()]))
      .expect("resolve label tuple")
      .inc(1)
      .expect("increment");
  }
  requests
    .labels(Either::Left(vec!["/one".to_string()]))
    .unwrap()
    .inc(1)
    .unwrap();

  for family in registry.collect() {
    for sample in family.samples {
      println!("{} {:?} {}", sample.name, sample.labels, sample.value);
    }
  }
}
