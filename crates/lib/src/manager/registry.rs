//! Class-exclusive manager registry.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use super::{Context, Manager, ManagerError};
use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::state::ItemState;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("{kind} is claimed by both {first} and {second}")]
  DuplicateClaim {
    kind: ItemKind,
    first: String,
    second: String,
  },

  #[error("no manager handles {id}")]
  NoManager { id: ItemId },
}

/// Managers in install order, indexed by the classes they claim.
pub struct ManagerRegistry {
  managers: Vec<Box<dyn Manager>>,
  by_kind: BTreeMap<ItemKind, usize>,
}

impl ManagerRegistry {
  pub fn new(managers: Vec<Box<dyn Manager>>) -> Result<Self, RegistryError> {
    let mut by_kind = BTreeMap::new();

    for (index, manager) in managers.iter().enumerate() {
      for kind in manager.managed_kinds() {
        if let Some(&first) = by_kind.get(kind) {
          let first: &Box<dyn Manager> = &managers[first];
          return Err(RegistryError::DuplicateClaim {
            kind: *kind,
            first: first.name().to_string(),
            second: manager.name().to_string(),
          });
        }
        by_kind.insert(*kind, index);
      }
      debug!(manager = manager.name(), kinds = ?manager.managed_kinds(), "registered manager");
    }

    Ok(Self { managers, by_kind })
  }

  pub fn len(&self) -> usize {
    self.managers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.managers.is_empty()
  }

  pub fn managers(&self) -> impl Iterator<Item = &dyn Manager> {
    self.managers.iter().map(|m| m.as_ref())
  }

  pub fn get(&self, index: usize) -> Option<&dyn Manager> {
    self.managers.get(index).map(|m| m.as_ref())
  }

  /// Position of the manager claiming `kind`, in install order.
  pub fn index_of(&self, kind: ItemKind) -> Option<usize> {
    self.by_kind.get(&kind).copied()
  }

  pub fn manager_for(&self, kind: ItemKind) -> Option<&dyn Manager> {
    self.index_of(kind).and_then(|i| self.get(i))
  }

  /// Fail unless a manager claims the class of `item`.
  pub fn require(&self, item: &ConfigItem) -> Result<usize, RegistryError> {
    self.index_of(item.kind()).ok_or_else(|| RegistryError::NoManager { id: item.id() })
  }

  /// Current state of any item. Unmanaged items always look converged.
  pub fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    match item {
      ConfigItem::Option(_) | ConfigItem::Checkpoint(_) => unmanaged_state(item),
      _ => self.dispatch(item)?.state_current(item),
    }
  }

  pub fn state_target(&self, item: &ConfigItem, ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    match item {
      ConfigItem::Option(_) | ConfigItem::Checkpoint(_) => unmanaged_state(item),
      _ => self.dispatch(item)?.state_target(item, ctx),
    }
  }

  fn dispatch(&self, item: &ConfigItem) -> Result<&dyn Manager, ManagerError> {
    self
      .manager_for(item.kind())
      .ok_or_else(|| ManagerError::invalid(item.id(), "no manager handles this item"))
  }
}

fn unmanaged_state(item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
  let state = match item {
    ConfigItem::Option(option) => ItemState::of(&option.values),
    _ => ItemState::of(&item.id()),
  };
  state.map(Some).map_err(|source| ManagerError::State { id: item.id(), source })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::Action;
  use crate::item::{OptionItem, Package};

  struct Fake {
    name: &'static str,
    kinds: Vec<ItemKind>,
  }

  impl Manager for Fake {
    fn name(&self) -> &str {
      self.name
    }

    fn managed_kinds(&self) -> &[ItemKind] {
      &self.kinds
    }

    fn state_current(&self, _item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
      Ok(None)
    }

    fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
      Ok(Some(ItemState::from_bytes(b"target")))
    }

    fn plan_install(&self, _items: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
      Ok(Vec::new())
    }

    fn plan_cleanup(&self, _keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
      Ok(Vec::new())
    }
  }

  fn fake(name: &'static str, kinds: &[ItemKind]) -> Box<dyn Manager> {
    Box::new(Fake {
      name,
      kinds: kinds.to_vec(),
    })
  }

  #[test]
  fn rejects_duplicate_claims() {
    let err = ManagerRegistry::new(vec![
      fake("A", &[ItemKind::Package]),
      fake("B", &[ItemKind::File, ItemKind::Package]),
    ])
    .err()
    .unwrap();

    match err {
      RegistryError::DuplicateClaim { kind, first, second } => {
        assert_eq!(kind, ItemKind::Package);
        assert_eq!(first, "A");
        assert_eq!(second, "B");
      }
      other => panic!("unexpected {other}"),
    }
  }

  #[test]
  fn indexes_in_supplied_order() {
    let registry = ManagerRegistry::new(vec![fake("A", &[ItemKind::Package]), fake("B", &[ItemKind::File])]).unwrap();
    assert_eq!(registry.index_of(ItemKind::Package), Some(0));
    assert_eq!(registry.index_of(ItemKind::File), Some(1));
    assert_eq!(registry.manager_for(ItemKind::File).map(|m| m.name()), Some("B"));
    assert!(registry.index_of(ItemKind::Swapfile).is_none());
  }

  #[test]
  fn require_names_unmanaged_item() {
    let registry = ManagerRegistry::new(vec![fake("A", &[ItemKind::File])]).unwrap();
    let err = registry.require(&ConfigItem::from(Package::new("vim"))).unwrap_err();
    assert!(matches!(err, RegistryError::NoManager { id } if id == ItemId::package("vim")));
  }

  #[test]
  fn option_state_follows_values() {
    let registry = ManagerRegistry::new(Vec::new()).unwrap();
    let a = registry
      .state_current(&OptionItem::new("x").value("a").into())
      .unwrap();
    let b = registry
      .state_current(&OptionItem::new("x").value("b").into())
      .unwrap();
    assert!(a.is_some());
    assert_ne!(a, b);
  }
}
