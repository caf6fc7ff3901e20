//! Actions: executable deltas between current and target state.
//!
//! An action names the items it installs, updates or removes, carries a
//! description for the operator and a deferred side effect. Planning collects
//! the [`ActionKey`] of every action; applying re-plans and compares keys to
//! detect divergence between plan and reality.

use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::BoxError;
use crate::confirm::ConfirmMode;
use crate::item::ItemId;
use crate::platform::users::LookupError;
use crate::shell::CommandError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ActionError {
  #[error(transparent)]
  Command(#[from] CommandError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Lookup(#[from] LookupError),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: io::Error,
  },

  #[error("hook '{name}' failed: {source}")]
  Hook {
    name: String,
    #[source]
    source: BoxError,
  },
}

impl ActionError {
  pub fn io(context: impl Into<String>, source: io::Error) -> Self {
    ActionError::Io {
      context: context.into(),
      source,
    }
  }
}

type Effect = Box<dyn FnOnce() -> Result<(), ActionError>>;

/// How an action changes the items it references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Install,
  Update,
  Remove,
}

impl ChangeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeKind::Install => "install",
      ChangeKind::Update => "update",
      ChangeKind::Remove => "remove",
    }
  }
}

impl fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identity of an action for matching applied actions against the plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ActionKey {
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub additional_info: Option<String>,
  pub installs: Vec<ItemId>,
  pub updates: Vec<ItemId>,
  pub removes: Vec<ItemId>,
}

pub struct Action {
  pub installs: Vec<ItemId>,
  pub updates: Vec<ItemId>,
  pub removes: Vec<ItemId>,
  pub description: String,
  pub additional_info: Option<String>,
  /// Loses data or stops something running even though nothing is removed.
  pub destructive: bool,
  /// Mode remembered for items that are no longer in the model.
  pub confirm_mode: Option<ConfirmMode>,
  effect: Effect,
}

impl Action {
  pub fn new<F>(description: impl Into<String>, effect: F) -> Self
  where
    F: FnOnce() -> Result<(), ActionError> + 'static,
  {
    Self {
      installs: Vec::new(),
      updates: Vec::new(),
      removes: Vec::new(),
      description: description.into(),
      additional_info: None,
      destructive: false,
      confirm_mode: None,
      effect: Box::new(effect),
    }
  }

  pub fn installs<I: IntoIterator<Item = ItemId>>(mut self, ids: I) -> Self {
    self.installs.extend(ids);
    self
  }

  pub fn updates<I: IntoIterator<Item = ItemId>>(mut self, ids: I) -> Self {
    self.updates.extend(ids);
    self
  }

  pub fn removes<I: IntoIterator<Item = ItemId>>(mut self, ids: I) -> Self {
    self.removes.extend(ids);
    self
  }

  pub fn info(mut self, info: impl Into<String>) -> Self {
    self.additional_info = Some(info.into());
    self
  }

  pub fn destructive(mut self) -> Self {
    self.destructive = true;
    self
  }

  pub fn confirm_mode(mut self, mode: Option<ConfirmMode>) -> Self {
    self.confirm_mode = mode;
    self
  }

  pub fn key(&self) -> ActionKey {
    ActionKey {
      description: self.description.clone(),
      additional_info: self.additional_info.clone(),
      installs: self.installs.clone(),
      updates: self.updates.clone(),
      removes: self.removes.clone(),
    }
  }

  /// Removals are always destructive.
  pub fn is_destructive(&self) -> bool {
    self.destructive || !self.removes.is_empty()
  }

  /// Every item the action touches with how it touches it.
  pub fn changes(&self) -> impl Iterator<Item = (&ItemId, ChangeKind)> {
    let installs = self.installs.iter().map(|id| (id, ChangeKind::Install));
    let updates = self.updates.iter().map(|id| (id, ChangeKind::Update));
    let removes = self.removes.iter().map(|id| (id, ChangeKind::Remove));
    installs.chain(updates).chain(removes)
  }

  pub fn run(self) -> Result<(), ActionError> {
    (self.effect)()
  }
}

impl fmt::Debug for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Action")
      .field("description", &self.description)
      .field("additional_info", &self.additional_info)
      .field("installs", &self.installs)
      .field("updates", &self.updates)
      .field("removes", &self.removes)
      .field("destructive", &self.destructive)
      .finish_non_exhaustive()
  }
}
