//! Workspace smoke test: builds `mpmetrics` as an ordinary path dependency
//! (catching anything that only breaks once the crate leaves its own
//! workspace root) and exercises the fork-then-increment scenario against a
//! *named*, path-backed arena rather than an anonymous one, so the test
//! also covers `Arena::create_at`/`Arena::open`'s reopen-by-path path
//! (spec.md section 3.1's "communicated between processes" note).

use either::Either;
use mpmetrics::registry::{counter, Registry};
use mpmetrics::Arena;

fn main() {
  let dir = tempfile::tempdir().expect("tempdir");
  let arena_path = dir.path().join("mpmetrics-integration.arena");

  let registry = Registry::new();
  let arena = Arena::create_at(&arena_path, 1 << 16).expect("create named arena");
  let requests = counter(&registry, &arena, "integration_total", "help", &[], "", "", "")
    .expect("construct counter");
  let metric = requests.labels(Either::Left(vec![])).expect("resolve child");

  const CHILDREN: i32 = 4;
  const INCREMENTS_PER_CHILD: i64 = 10_000;

  #[cfg(unix)]
  {
    let mut children = Vec::new();
    for _ in 0..CHILDREN {
      let pid = unsafe { libc::fork() };
      if pid == 0 {
        for _ in 0..INCREMENTS_PER_CHILD {
          metric.inc(1).expect("increment in child");
        }
        unsafe { libc::_exit(0) };
      }
      children.push(pid);
    }
    for pid in children {
      let mut status = 0;
      unsafe { libc::waitpid(pid, &mut status, 0) };
      assert_eq!(status, 0, "child {pid} exited abnormally");
    }
  }
  #[cfg(not(unix))]
  {
    for _ in 0..(CHILDREN as i64 * INCREMENTS_PER_CHILD) {
      metric.inc(1).expect("increment");
    }
  }

  let families = registry.collect();
  let total = families[0]
    .samples
    .iter()
    .find(|s| s.name == "integration_total")
    .expect("counter sample")
    .value;
  assert_eq!(total, (CHILDREN as i64 * INCREMENTS_PER_CHILD) as f64);

  // `Arena::create_at` deduplicates by canonical path within one process
  // (spec.md section 3.1's per-process "one Arena per backing file" cache);
  // reopening the same path here must hand back the same underlying
  // mapping rather than a second, independent one.
  let reopened = Arena::create_at(&arena_path, 1 << 16).expect("reopen named arena");
  assert_eq!(reopened.allocated(), arena.allocated());

  println!("integration smoke test passed: total={total}");
}
