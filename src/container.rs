//! Variable-size containers: `Dict` and `List`.
//!
//! A fixed `(start, size, len)` header lives in the arena; the actual
//! mapping/sequence is re-serialized with `serde` + `postcard` into a
//! separately allocated block on every mutation. Synchronization is the
//! caller's responsibility: both `Dict` and `List` require external locking,
//! which in this crate is always `registry::LabeledCollector`'s shared lock.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::arena::{Arena, Block};
use crate::layout::{struct_layout, Layout, SizeT};

struct_layout! {
  /// `(start, size, len)`: locates a serialized byte buffer inside the
  /// arena. `len <= size`; when the payload outgrows `size` a new, larger
  /// block is allocated.
  pub struct ObjectHeader {
    start: SizeT,
    size: SizeT,
    len: SizeT,
  }
}

/// Growth factor applied when a container's serialized form outgrows its
/// current block. Grown generously because the arena never frees the old
/// block, so frequent small regrowths would waste more space than one big
/// jump.
const GROWTH_FACTOR: u64 = 4;

fn block_of(arena: &Arena, header: &ObjectHeader) -> Option<Block> {
  let size = header.size.get();
  if size == 0 {
    return None;
  }
  Some(arena.block_at(header.start.get(), size as u32))
}

fn store<T: Serialize>(arena: &Arena, header: &ObjectHeader, value: &T) {
  let bytes = postcard::to_allocvec(value).expect("container payload serialization");
  let new_len = bytes.len() as u64;
  header.len.set(new_len);

  if new_len > header.size.get() {
    let new_size = (GROWTH_FACTOR * new_len.max(1)) as u32;
    let block = arena
      .malloc_cache_aligned(new_size)
      .expect("arena has room to grow a container payload");
    header.start.set(block.start());
    header.size.set(block.size() as u64);
  }

  let block = block_of(arena, header).expect("just-allocated block is non-empty");
  block.deref_mut()[..new_len as usize].copy_from_slice(&bytes);
}

fn load<T: Default + DeserializeOwned>(arena: &Arena, header: &ObjectHeader) -> T {
  let len = header.len.get() as usize;
  if len == 0 {
    return T::default();
  }
  let block = block_of(arena, header).expect("non-zero len implies an allocated block");
  postcard::from_bytes(&block.deref()[..len]).expect("container payload deserialization")
}

/// An arena-resident `BTreeMap`, re-serialized on every mutation.
///
/// `K`/`V` use a `BTreeMap` rather than a hash map so that encoded bytes
/// (and therefore allocation sizes) are deterministic across processes,
/// which simplifies reasoning about the 4x growth factor above.
pub struct Dict<'a, K, V> {
  header: &'a ObjectHeader,
  arena: &'a Arena,
  _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> Dict<'a, K, V>
where
  K: Ord + Serialize + DeserializeOwned + Clone,
  V: Serialize + DeserializeOwned + Clone,
{
  pub fn new(header: &'a ObjectHeader, arena: &'a Arena) -> Self {
    Self {
      header,
      arena,
      _marker: PhantomData,
    }
  }

  /// Decodes the full map. Cold path; callers hold a shared lock around
  /// this and any subsequent mutation.
  pub fn snapshot(&self) -> BTreeMap<K, V> {
    load(self.arena, self.header)
  }

  pub fn get(&self, key: &K) -> Option<V> {
    self.snapshot().get(key).cloned()
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.snapshot().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Inserts `value` under `key`, re-serializing the whole map.
  pub fn insert(&self, key: K, value: V) {
    let mut map = self.snapshot();
    map.insert(key, value);
    store(self.arena, self.header, &map);
  }

  pub fn remove(&self, key: &K) -> Option<V> {
    let mut map = self.snapshot();
    let removed = map.remove(key);
    store(self.arena, self.header, &map);
    removed
  }

  pub fn clear(&self) {
    self.header.len.set(0);
  }
}

/// An arena-resident `Vec`, re-serialized on every mutation.
pub struct List<'a, T> {
  header: &'a ObjectHeader,
  arena: &'a Arena,
  _marker: PhantomData<T>,
}

impl<'a, T> List<'a, T>
where
  T: Serialize + DeserializeOwned + Clone,
{
  pub fn new(header: &'a ObjectHeader, arena: &'a Arena) -> Self {
    Self {
      header,
      arena,
      _marker: PhantomData,
    }
  }

  pub fn snapshot(&self) -> Vec<T> {
    load(self.arena, self.header)
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn push(&self, value: T) {
    let mut v = self.snapshot();
    v.push(value);
    store(self.arena, self.header, &v);
  }

  pub fn pop(&self) -> Option<T> {
    let mut v = self.snapshot();
    let popped = v.pop();
    store(self.arena, self.header, &v);
    popped
  }

  pub fn clear(&self) {
    self.header.len.set(0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fresh_header() -> Box<[u8]> {
    let mut bytes = vec![0u8; ObjectHeader::SIZE].into_boxed_slice();
    ObjectHeader::init(&mut bytes);
    bytes
  }

  #[test]
  fn dict_insert_get_remove_roundtrip() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let bytes = fresh_header();
    let header = ObjectHeader::view(&bytes);
    let dict: Dict<String, u64> = Dict::new(header, &arena);

    assert!(dict.is_empty());
    dict.insert("a".into(), 1);
    dict.insert("b".into(), 2);
    assert_eq!(dict.len(), 2);
    assert_eq!(dict.get(&"a".to_string()), Some(1));
    assert_eq!(dict.remove(&"a".to_string()), Some(1));
    assert_eq!(dict.get(&"a".to_string()), None);
    assert_eq!(dict.len(), 1);
  }

  #[test]
  fn dict_grows_payload_block_across_many_inserts() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let bytes = fresh_header();
    let header = ObjectHeader::view(&bytes);
    let dict: Dict<u64, String> = Dict::new(header, &arena);

    for i in 0..200u64 {
      dict.insert(i, format!("value-number-{i}"));
    }
    assert_eq!(dict.len(), 200);
    for i in [0u64, 57, 199] {
      assert_eq!(dict.get(&i), Some(format!("value-number-{i}")));
    }
  }

  #[test]
  fn list_push_pop_roundtrip() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let bytes = fresh_header();
    let header = ObjectHeader::view(&bytes);
    let list: List<u64> = List::new(header, &arena);

    list.push(1);
    list.push(2);
    list.push(3);
    assert_eq!(list.snapshot(), vec![1, 2, 3]);
    assert_eq!(list.pop(), Some(3));
    assert_eq!(list.len(), 2);
  }
}
