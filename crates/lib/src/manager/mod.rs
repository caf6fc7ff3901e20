//! The manager contract.
//!
//! A manager knows how to observe, compute and converge a set of item classes.
//! The engine drives every manager through the same lifecycle:
//!
//! 1. `initialize` once per phase
//! 2. `plan_install` once per install step, in schedule order
//! 3. `plan_cleanup` once, in cleanup order
//! 4. `finalize` once per phase
//!
//! During planning the context is a dry run. A manager must not change the
//! system or its store while `ctx.dryrun` is set; the actions it returns are
//! only compared and displayed, never executed.

pub mod registry;

use std::io;

use thiserror::Error;

use crate::BoxError;
use crate::action::Action;
use crate::item::{ConfigItem, ItemId, ItemKind, OptionError};
use crate::log::Logger;
use crate::model::Model;
use crate::platform::users::LookupError;
use crate::shell::CommandError;
use crate::state::ItemState;
use crate::store::StoreError;
use crate::util::hash::HashError;

pub use registry::{ManagerRegistry, RegistryError};

/// When a manager runs in the cleanup phase relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CleanupOrder {
  First,
  /// Reverse of the order managers were supplied in.
  ReverseInstallOrder,
  Last,
}

/// What a manager sees while planning or applying.
#[derive(Clone, Copy)]
pub struct Context<'a> {
  pub model: &'a Model,
  pub dryrun: bool,
  pub log: &'a Logger,
}

impl<'a> Context<'a> {
  /// Declared items of the given classes, in declaration order.
  pub fn declared(&self, kinds: &[ItemKind]) -> Vec<&'a ConfigItem> {
    self.model.items().filter(|item| kinds.contains(&item.kind())).collect()
  }
}

#[derive(Debug, Error)]
pub enum ManagerError {
  #[error("{id}: {reason}")]
  Invalid { id: ItemId, reason: String },

  #[error("{manager} does not manage {id}")]
  WrongItem { manager: String, id: ItemId },

  #[error(transparent)]
  Command(#[from] CommandError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to produce content of {id}: {source}")]
  Content {
    id: ItemId,
    #[source]
    source: BoxError,
  },

  #[error("failed to compute state of {id}: {source}")]
  State {
    id: ItemId,
    #[source]
    source: HashError,
  },

  #[error(transparent)]
  Lookup(#[from] LookupError),

  #[error(transparent)]
  Option(#[from] OptionError),
}

impl ManagerError {
  pub fn invalid(id: ItemId, reason: impl Into<String>) -> Self {
    ManagerError::Invalid {
      id,
      reason: reason.into(),
    }
  }

  pub fn io(context: impl Into<String>, source: io::Error) -> Self {
    ManagerError::Io {
      context: context.into(),
      source,
    }
  }

  pub fn wrong_item(manager: &str, item: &ConfigItem) -> Self {
    ManagerError::WrongItem {
      manager: manager.to_string(),
      id: item.id(),
    }
  }
}

pub trait Manager {
  /// Stable name; also the file name of the manager's store.
  fn name(&self) -> &str;

  fn managed_kinds(&self) -> &[ItemKind];

  fn cleanup_order(&self) -> CleanupOrder {
    CleanupOrder::ReverseInstallOrder
  }

  /// Reject items with missing or contradictory attributes before anything runs.
  fn assert_installable(&self, _item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    Ok(())
  }

  /// State of the item on the live system; `None` if absent.
  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError>;

  /// State the item will have once installed.
  fn state_target(&self, item: &ConfigItem, ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError>;

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError>;

  /// Actions removing what this manager installed earlier and `keep` no longer lists.
  fn plan_cleanup(&self, keep: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError>;

  fn initialize(&self, _ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(())
  }

  fn finalize(&self, _ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(())
  }
}
