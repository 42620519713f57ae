//! Small arithmetic helpers shared by the arena and layout modules.

/// Rounds `x` up to the nearest multiple of `a`. `a` must be a power of two.
#[inline]
pub(crate) const fn align_up(x: u64, a: u64) -> u64 {
  debug_assert!(a.is_power_of_two());
  (x + (a - 1)) & !(a - 1)
}

/// Rounds `x` down to the nearest multiple of `a`. `a` must be a power of two.
#[inline]
pub(crate) const fn align_down(x: u64, a: u64) -> u64 {
  debug_assert!(a.is_power_of_two());
  x & !(a - 1)
}

/// Returns a mask with bits `[lo, hi]` set, inclusive.
#[inline]
pub(crate) const fn genmask(hi: u32, lo: u32) -> u64 {
  let high = if hi == 63 { !0u64 } else { (1u64 << (hi + 1)) - 1 };
  high & !((1u64 << lo) - 1)
}

/// Reads the OS allocation granularity / page size, falling back to 4096.
#[cfg(feature = "std")]
pub(crate) fn page_size() -> usize {
  let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if v > 0 {
    v as usize
  } else {
    4096
  }
}

/// Reads the L1 data cache line size, falling back to 64 bytes.
#[cfg(feature = "std")]
pub(crate) fn cache_line_size() -> usize {
  #[cfg(target_os = "linux")]
  {
    const SC_LEVEL1_DCACHE_LINESIZE: i32 = 190;
    let v = unsafe { libc::sysconf(SC_LEVEL1_DCACHE_LINESIZE) };
    if v > 0 {
      return v as usize;
    }
  }
  64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn align_up_rounds() {
    assert_eq!(align_up(0, 8), 0);
    assert_eq!(align_up(1, 8), 8);
    assert_eq!(align_up(8, 8), 8);
    assert_eq!(align_up(9, 8), 16);
  }

  #[test]
  fn align_down_rounds() {
    assert_eq!(align_down(0, 8), 0);
    assert_eq!(align_down(7, 8), 0);
    assert_eq!(align_down(8, 8), 8);
    assert_eq!(align_down(15, 8), 8);
  }

  #[test]
  fn genmask_bits() {
    assert_eq!(genmask(62, 0), (1u64 << 63) - 1);
    assert_eq!(genmask(63, 63), 1u64 << 63);
    assert_eq!(genmask(3, 1), 0b1110);
  }

  #[test]
  fn page_size_is_sane() {
    let p = page_size();
    assert!(p >= 4096);
    assert!(p.is_power_of_two());
  }
}
