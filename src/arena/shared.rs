//! Per-process window mapping over the arena's backing file.
//!
//! A sparse, page-indexed sequence of `mmap` windows, faulted in lazily one
//! per `map_size`-sized span of the file so that a process never has to map
//! more of the file than it has actually touched.

use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::Mutex;

use crate::layout::Layout;

use super::ArenaHeader;

/// State shared by every [`super::Block`] and [`super::Arena`] handle that
/// was cloned from the same construction. One `Shared` exists per backing
/// file per process; [`super::Arena::create_at`]/[`super::Arena::open`]
/// deduplicate by path so that reopening the same file in one process
/// reuses the same mappings.
pub(super) struct Shared {
  pub(super) map_size: u64,
  file: File,
  /// Cached file length; updated under `header().lock` whenever `malloc`
  /// extends the file, so readers never need to stat().
  len: AtomicU64,
  /// `maps[i]` is the mapping covering file bytes
  /// `[i * map_size, (i + 1) * map_size)`, or `None` if not yet faulted in.
  maps: Mutex<Vec<Option<MmapRaw>>>,
  /// Raw pointer into `maps[0]`, valid for the lifetime of `Shared` because
  /// window 0 is mapped eagerly at construction and never unmapped.
  header_ptr: *mut u8,
}

// SAFETY: `header_ptr` points into an mmap'd region that outlives `Shared`
// (it is never unmapped until `Shared` itself drops) and all access to the
// bytes it points to goes through `Layout`-typed cells with their own
// interior synchronization (atomics, `RawMutex`).
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

fn map_window(file: &File, offset: u64, len: u64) -> io::Result<MmapRaw> {
  unsafe {
    MmapOptions::new()
      .offset(offset)
      .len(len as usize)
      .map_raw(file)
  }
}

impl Shared {
  /// Wraps an already-sized backing file. `fresh` selects whether the arena
  /// header (lock + shared base) is (re)initialized, which must happen
  /// exactly once, by whoever first creates the file.
  pub(super) fn new(map_size: u64, file: File, fresh: bool) -> io::Result<Self> {
    let header_span = map_size.max(ArenaHeader::SIZE as u64);
    let len = file.metadata()?.len();
    if fresh || len < header_span {
      file.set_len(header_span.max(len))?;
    }
    let len = file.metadata()?.len();

    let window0 = map_window(&file, 0, map_size)?;
    let header_ptr = window0.as_mut_ptr();

    let shared = Self {
      map_size,
      file,
      len: AtomicU64::new(len),
      maps: Mutex::new(vec![Some(window0)]),
      header_ptr,
    };

    if fresh {
      let hdr_bytes = unsafe { std::slice::from_raw_parts_mut(header_ptr, ArenaHeader::SIZE) };
      ArenaHeader::init(hdr_bytes);
      shared.header().base.set(ArenaHeader::SIZE as u64);
    }

    Ok(shared)
  }

  pub(super) fn header(&self) -> &ArenaHeader {
    let bytes = unsafe { std::slice::from_raw_parts(self.header_ptr, ArenaHeader::SIZE) };
    ArenaHeader::view(bytes)
  }

  pub(super) fn file_len(&self) -> u64 {
    self.len.load(Ordering::Acquire)
  }

  /// Extends the backing file so that it is at least `min_len` bytes,
  /// rounded up to a `map_size` boundary. Must be called with the arena
  /// header lock held.
  pub(super) fn grow_to(&self, min_len: u64) -> io::Result<()> {
    let target = crate::util::align_up(min_len, self.map_size);
    if target > self.file_len() {
      self.file.set_len(target)?;
      self.len.store(target, Ordering::Release);
    }
    Ok(())
  }

  /// Returns a pointer to the byte at `start`, faulting in whatever window
  /// of the file covers `[start, start + size)` if it is not already
  /// mapped in this process.
  pub(super) fn deref_ptr(&self, start: u64, size: u64) -> *mut u8 {
    let first = start / self.map_size;
    let last = (start + size.max(1) - 1) / self.map_size;
    let page_off = crate::util::align_down(start, self.map_size);
    let off = start - page_off;

    let mut maps = self.maps.lock();
    if maps.len() <= last as usize {
      maps.resize_with(last as usize + 1, || None);
    }
    if maps[first as usize].is_none() {
      let span = last - first + 1;
      let mmap = map_window(&self.file, page_off, span * self.map_size)
        .expect("mmap of already-ftruncate'd region cannot fail");
      maps[first as usize] = Some(mmap);
    }
    let base = maps[first as usize].as_ref().unwrap().as_mut_ptr();
    unsafe { base.add(off as usize) }
  }
}
