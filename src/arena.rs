//! A file-backed, monotonically-growing shared-memory allocator.
//!
//! An [`Arena`] hands out process-stable, cache-line-aligned byte ranges
//! ([`Block`]s) whose addresses may differ per process but whose identities
//! — `(start, size)` pairs into a shared backing file — survive fork. There
//! is no `free`: the arena only ever grows, and a block's bytes stay valid
//! for as long as the arena itself is alive.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::layout::{struct_layout, Layout};
use crate::lock::RawMutex;
use crate::util::{align_up, cache_line_size, page_size};

mod shared;
use shared::Shared;

struct_layout! {
  /// The arena's own metadata, stored at offset 0 of the backing file:
  /// the shared interprocess lock guarding `base`, and `base` itself — the
  /// next free byte offset.
  pub struct ArenaHeader {
    lock: RawMutex,
    base: crate::layout::SizeT,
  }
}

/// Failure modes of [`Arena::malloc`] and arena construction.
#[derive(Debug)]
pub enum ArenaError {
  /// `size` was not strictly positive.
  InvalidSize,
  /// `alignment` was not a power of two.
  InvalidAlignment,
  /// `map_size` was not a power of two, or not a multiple of the OS
  /// allocation granularity.
  InvalidMapSize,
  /// The backing file could not be extended, or could not be mapped.
  Io(io::Error),
}

impl fmt::Display for ArenaError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidSize => write!(f, "size must be strictly positive"),
      Self::InvalidAlignment => write!(f, "alignment is not a power of 2"),
      Self::InvalidMapSize => {
        write!(f, "map_size must be a power of two and a multiple of the allocation granularity")
      }
      Self::Io(e) => write!(f, "arena I/O error: {e}"),
    }
  }
}

impl std::error::Error for ArenaError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for ArenaError {
  fn from(e: io::Error) -> Self {
    Self::Io(e)
  }
}

fn validate_map_size(map_size: u64) -> Result<(), ArenaError> {
  if map_size == 0 || map_size & (map_size - 1) != 0 {
    return Err(ArenaError::InvalidMapSize);
  }
  let granularity = page_size() as u64;
  if map_size % granularity != 0 {
    return Err(ArenaError::InvalidMapSize);
  }
  Ok(())
}

fn named_arena_cache() -> &'static Mutex<std::collections::HashMap<PathBuf, Weak<Shared>>> {
  static CACHE: OnceLock<Mutex<std::collections::HashMap<PathBuf, Weak<Shared>>>> =
    OnceLock::new();
  CACHE.get_or_init(Default::default)
}

/// A process-group-wide, monotonically-growing byte region. Cheap to clone:
/// every clone shares the same underlying file descriptor and per-process
/// window cache.
#[derive(Clone)]
pub struct Arena {
  inner: Arc<Shared>,
}

impl Arena {
  /// Creates a new arena backed by an anonymous, already-unlinked temporary
  /// file (`tempfile::tempfile`): visible only to processes that inherit
  /// this file descriptor via `fork`.
  pub fn create_anonymous(map_size: usize) -> Result<Self, ArenaError> {
    let map_size = map_size as u64;
    validate_map_size(map_size)?;
    let file = tempfile::tempfile()?;
    let inner = Arc::new(Shared::new(map_size, file, true)?);
    #[cfg(feature = "tracing")]
    tracing::debug!(map_size, "created anonymous arena");
    Ok(Self { inner })
  }

  /// Creates (or reopens, if another process already created it) an arena
  /// backed by a named file under `path`, deduplicated per-process by
  /// canonical path so that repeated calls from the same process reuse one
  /// set of mappings.
  pub fn create_at<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, ArenaError> {
    let path = path.as_ref();
    let map_size = map_size as u64;
    validate_map_size(map_size)?;

    let mut cache = named_arena_cache().lock().unwrap();
    if let Some(existing) = cache.get(path).and_then(Weak::upgrade) {
      return Ok(Self { inner: existing });
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(path)?;
    let fresh = file.metadata()?.len() == 0;
    let inner = Arc::new(Shared::new(map_size, file, fresh)?);
    cache.insert(path.to_path_buf(), Arc::downgrade(&inner));
    #[cfg(feature = "tracing")]
    tracing::debug!(?path, map_size, fresh, "opened named arena");
    Ok(Self { inner })
  }

  /// Reopens an arena a sibling process created with [`Arena::create_at`].
  /// The caller must supply the same `map_size` the original creator used;
  /// the backing file carries no header or magic number from which this
  /// could be recovered.
  pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, ArenaError> {
    Self::create_at(path, map_size)
  }

  /// Allocates `size` bytes aligned to `alignment`. Never lets a block
  /// straddle a `map_size` boundary: larger-than-window allocations are
  /// rounded up to a whole number of windows and forced to `map_size`
  /// alignment instead, so the whole span can be mapped in one call.
  pub fn malloc(&self, size: u32, alignment: u32) -> Result<Block, ArenaError> {
    if size == 0 {
      return Err(ArenaError::InvalidSize);
    }
    if alignment == 0 || alignment & (alignment - 1) != 0 {
      return Err(ArenaError::InvalidAlignment);
    }

    let map_size = self.inner.map_size;
    let mut size = size as u64;
    let mut alignment = alignment as u64;
    if size > map_size {
      size = align_up(size, map_size);
      alignment = map_size;
    }

    let header = self.inner.header();
    let _guard = header
      .lock
      .lock()
      .map_err(|_| ArenaError::Io(io::Error::new(io::ErrorKind::Other, "arena lock poisoned")))?;

    let shared_base = header.base.get();
    let page_boundary = align_up(shared_base, map_size);
    let mut candidate = align_up(shared_base, alignment);
    if candidate + size > page_boundary {
      candidate = page_boundary;
    }

    if candidate + size > self.inner.file_len() {
      self.inner.grow_to(candidate + size)?;
      #[cfg(feature = "tracing")]
      tracing::trace!(new_len = self.inner.file_len(), "grew arena backing file");
    }

    header.base.set(candidate + size);

    Ok(Block {
      arena: self.inner.clone(),
      start: candidate,
      size: size as u32,
    })
  }

  /// Allocates `size` bytes at the platform cache-line alignment; the
  /// alignment [`crate::layout::Boxed`] uses for every owned allocation.
  pub fn malloc_cache_aligned(&self, size: u32) -> Result<Block, ArenaError> {
    self.malloc(size, cache_line_size() as u32)
  }

  /// Bytes allocated so far (the arena's `shared_base`, minus its header).
  pub fn allocated(&self) -> u64 {
    self.inner.header().base.get()
  }

  pub fn map_size(&self) -> u64 {
    self.inner.map_size
  }

  /// Reconstructs a [`Block`] from raw `(start, size)` coordinates
  /// previously handed out by [`Arena::malloc`]. Used to locate the
  /// payload block referenced by a [`crate::container::ObjectHeader`].
  pub(crate) fn block_at(&self, start: u64, size: u32) -> Block {
    Block {
      arena: self.inner.clone(),
      start,
      size,
    }
  }
}

/// A `(arena, start, size)` identifier for a byte range inside an
/// [`Arena`]. Cheap to clone; the clone shares the arena's file descriptor
/// and per-process window cache rather than re-mapping anything.
#[derive(Clone)]
pub struct Block {
  arena: Arc<Shared>,
  start: u64,
  size: u32,
}

impl fmt::Debug for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Block")
      .field("start", &self.start)
      .field("size", &self.size)
      .finish()
  }
}

impl Block {
  pub fn start(&self) -> u64 {
    self.start
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  /// Dereferences this block in the calling process, faulting in whatever
  /// mapping window covers it if it is not yet mapped here.
  pub fn deref(&self) -> &[u8] {
    let ptr = self.arena.deref_ptr(self.start, self.size as u64);
    unsafe { std::slice::from_raw_parts(ptr, self.size as usize) }
  }

  /// Like [`Block::deref`], but for the allocator that just created this
  /// block and needs to run [`crate::layout::Layout::init`] on it. Safe in
  /// the sense that no other process can have observed this range yet
  /// (nothing else has been handed this `Block` until the allocator
  /// publishes it), but the crate never upgrades a `&[u8]` into `&mut [u8]`
  /// once a block has been shared.
  pub(crate) fn deref_mut(&self) -> &mut [u8] {
    let ptr = self.arena.deref_ptr(self.start, self.size as u64);
    unsafe { std::slice::from_raw_parts_mut(ptr, self.size as usize) }
  }

  /// No-op: the arena never frees individual allocations.
  pub fn free(&self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  fn small_arena() -> Arena {
    Arena::create_anonymous(page_size()).unwrap()
  }

  #[test]
  fn malloc_rejects_bad_size_and_alignment() {
    let arena = small_arena();
    assert!(matches!(
      arena.malloc(0, 8).unwrap_err(),
      ArenaError::InvalidSize
    ));
    assert!(matches!(
      arena.malloc(8, 3).unwrap_err(),
      ArenaError::InvalidAlignment
    ));
  }

  #[test]
  fn malloc_returns_disjoint_aligned_blocks() {
    let arena = small_arena();
    let mut blocks = Vec::new();
    for (size, align) in [(16u32, 8u32), (32, 16), (8, 8), (64, 32), (1, 1)] {
      let b = arena.malloc(size, align).unwrap();
      assert_eq!(b.start() % align as u64, 0);
      assert_eq!(b.size(), size);
      blocks.push(b);
    }
    for i in 0..blocks.len() {
      for j in (i + 1)..blocks.len() {
        let a = &blocks[i];
        let b = &blocks[j];
        let disjoint = a.start() + a.size() as u64 <= b.start()
          || b.start() + b.size() as u64 <= a.start();
        assert!(disjoint, "blocks {i} and {j} overlap");
      }
    }
  }

  #[test]
  fn large_block_is_map_size_aligned() {
    let map_size = page_size();
    let arena = Arena::create_anonymous(map_size).unwrap();
    let big = arena.malloc((map_size * 3) as u32, 8).unwrap();
    assert_eq!(big.start() % map_size as u64, 0);
    assert!(big.size() as usize >= map_size * 3);
    assert_eq!(big.size() as usize % map_size, 0);
  }

  #[test]
  fn deref_is_zeroed_and_writes_are_visible() {
    let arena = small_arena();
    let block = arena.malloc(64, 8).unwrap();
    assert!(block.deref().iter().all(|&b| b == 0));
    block.deref_mut()[0] = 0xAB;
    assert_eq!(block.deref()[0], 0xAB);
  }

  #[test]
  fn two_blocks_from_same_arena_alias_independent_ranges() {
    let arena = small_arena();
    let a = arena.malloc(8, 8).unwrap();
    let b = arena.malloc(8, 8).unwrap();
    a.deref_mut().copy_from_slice(&[1; 8]);
    b.deref_mut().copy_from_slice(&[2; 8]);
    assert_eq!(a.deref(), &[1; 8]);
    assert_eq!(b.deref(), &[2; 8]);
  }

  #[test]
  fn named_arena_is_deduplicated_per_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arena.bin");
    let a = Arena::create_at(&path, page_size()).unwrap();
    let b = Arena::create_at(&path, page_size()).unwrap();
    assert!(Arc::ptr_eq(&a.inner, &b.inner));
  }

  #[cfg(unix)]
  #[test]
  fn fork_child_sees_parent_writes_and_vice_versa() {
    let arena = small_arena();
    let block = arena.malloc(8, 8).unwrap();
    assert!(block.deref().iter().all(|&b| b == 0));

    let pid = unsafe { libc::fork() };
    if pid == 0 {
      // Child: verify zeros, write a marker, exit.
      let ok = block.deref().iter().all(|&b| b == 0);
      block.deref_mut().copy_from_slice(&[0x42; 8]);
      unsafe { libc::_exit(if ok { 0 } else { 1 }) };
    }
    assert!(pid > 0);
    let mut status = 0;
    unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(status, 0, "child observed non-zero memory");
    assert_eq!(block.deref(), &[0x42; 8]);
  }
}
