//! OpenMetrics calls this kind "StateSet"; the public type here is named
//! `Enum`, and this file is named for the OpenMetrics kind to sidestep
//! `enum` being a Rust keyword.

use crate::arena::Arena;
use crate::atomic::AtomicUInt64;
use crate::error::{ArgumentError, ConfigError, ConstructError, MetricError};
use crate::layout::{struct_layout, Boxed};

struct_layout! {
  pub struct EnumData {
    value: AtomicUInt64,
  }
}

/// A metric that is always in exactly one of a fixed, named set of states.
pub struct Enum {
  data: Boxed<EnumData>,
  states: Vec<String>,
}

impl Enum {
  /// `states` must be non-empty; the first entry is the default state.
  pub(crate) fn new(arena: &Arena, states: Vec<String>) -> Result<Self, ConstructError> {
    if states.is_empty() {
      return Err(ConfigError::EmptyStates.into());
    }
    let data = Boxed::new(arena)?;
    Ok(Self { data, states })
  }

  /// Reattaches to an enum another process already constructed with the
  /// same `states`.
  pub(crate) fn attach(arena: &Arena, block: crate::arena::Block, states: Vec<String>) -> Self {
    Self {
      data: Boxed::from_block(arena, block),
      states,
    }
  }

  pub(crate) fn block(&self) -> &crate::arena::Block {
    self.data.block()
  }

  pub fn states(&self) -> &[String] {
    &self.states
  }

  /// Sets the current state to `name`, raising if `name` is not one of the
  /// declared states.
  pub fn state(&self, name: &str) -> Result<(), MetricError> {
    let index = self
      .states
      .iter()
      .position(|s| s == name)
      .ok_or_else(|| ArgumentError::UnknownState(name.to_string()))?;
    self.data.value.set(index as u64);
    Ok(())
  }

  /// The index of the currently selected state into [`Enum::states`].
  pub(crate) fn sample(&self) -> usize {
    self.data.value.get() as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_enum(arena: &Arena) -> Enum {
    Enum::new(arena, vec!["a".into(), "b".into(), "c".into()]).unwrap()
  }

  #[test]
  fn defaults_to_first_state() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let e = new_enum(&arena);
    assert_eq!(e.sample(), 0);
  }

  #[test]
  fn state_transitions_and_rejects_unknown_name() {
    let arena = Arena::create_anonymous(4096).unwrap();
    let e = new_enum(&arena);
    e.state("b").unwrap();
    assert_eq!(e.sample(), 1);
    assert!(matches!(
      e.state("d").unwrap_err(),
      MetricError::Argument(ArgumentError::UnknownState(_))
    ));
    assert_eq!(e.sample(), 1);
  }

  #[test]
  fn empty_states_is_rejected_at_construction() {
    let arena = Arena::create_anonymous(4096).unwrap();
    assert!(matches!(
      Enum::new(&arena, vec![]).unwrap_err(),
      ConstructError::Config(ConfigError::EmptyStates)
    ));
  }
}
