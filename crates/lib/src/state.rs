//! Item states.
//!
//! A state is an opaque description of an item as it exists (current) or
//! should exist (target) on the system. The engine only compares states, and
//! two states are equal when their content hashes are equal. `None` in place
//! of a state means the item is not present.

use serde::Serialize;

use crate::util::hash::{ContentHash, HashError, hash_bytes, hash_value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemState {
  hash: ContentHash,
}

impl ItemState {
  /// State described by any serializable value.
  pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, HashError> {
    Ok(Self {
      hash: hash_value(value)?,
    })
  }

  /// State described by raw bytes.
  pub fn from_bytes(bytes: &[u8]) -> Self {
    Self {
      hash: hash_bytes(bytes),
    }
  }

  pub fn from_hash(hash: ContentHash) -> Self {
    Self { hash }
  }

  pub fn sha256(&self) -> &ContentHash {
    &self.hash
  }
}

/// Whether an item needs work: present-vs-absent or hash mismatch.
pub fn differs(current: Option<&ItemState>, target: Option<&ItemState>) -> bool {
  current != target
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Serialize)]
  struct Unit {
    enabled: bool,
  }

  #[test]
  fn equality_is_hash_equality() {
    let a = ItemState::of(&Unit { enabled: true }).unwrap();
    let b = ItemState::of(&Unit { enabled: true }).unwrap();
    let c = ItemState::of(&Unit { enabled: false }).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, ItemState::from_hash(a.sha256().clone()));
  }

  #[test]
  fn absent_differs_from_present() {
    let s = ItemState::from_bytes(b"x");
    assert!(differs(None, Some(&s)));
    assert!(differs(Some(&s), None));
    assert!(!differs(Some(&s), Some(&s.clone())));
    assert!(!differs(None, None));
  }
}
