//! Fork-then-increment, the literal end-to-end scenario of spec.md section
//! 8: a parent process constructs a counter, forks `N` children, each child
//! increments it `10_000` times, and the parent's sample equals
//! `10_000 * N` once every child has exited. No IPC message is sent on the
//! hot path; every increment is a single atomic add into the arena's
//! backing file, inherited by each child across `fork()`.
//!
//! Unix-only (uses `libc::fork`/`waitpid` directly, as spec.md section 1
//! assumes a POSIX-like fork/exec model and treats the interprocess lock as
//! an external contract built on it).

#[cfg(unix)]
fn main() {
  use either::Either;
  use mpmetrics::registry::{counter, Registry};

  const CHILDREN: i32 = 4;
  const INCREMENTS_PER_CHILD: i64 = 10_000;

  let registry = Registry::new();
  let arena = mpmetrics::Arena::create_anonymous(1 << 16).expect("create arena");
  let requests = counter(&registry, &arena, "forked_total", "help", &[], "", "", "")
    .expect("construct counter");
  let metric = requests.labels(Either::Left(vec![])).expect("resolve child");

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

  let families = registry.collect();
  let total = families[0]
    .samples
    .iter()
    .find(|s| s.name == "forked_total")
    .expect("counter sample")
    .value;
  println!(
    "parent observed total = {total} (expected {})",
    CHILDREN as i64 * INCREMENTS_PER_CHILD
  );
  assert_eq!(total, (CHILDREN as i64 * INCREMENTS_PER_CHILD) as f64);
}

#[cfg(not(unix))]
fn main() {
  eprintln!("the fork demo requires a POSIX-like platform");
}
