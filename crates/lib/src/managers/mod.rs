//! Concrete managers.
//!
//! Every manager talks to the system through a shared [`CommandRunner`] and
//! keeps its bookkeeping in its own [`JsonStore`] through a [`Ledger`].
//! [`defaults`] returns them in install order.

pub mod file;
pub mod flatpak;
pub mod group;
pub mod hook;
pub mod pacman;
pub mod pacman_key;
pub mod swapfile;
pub mod systemd;
pub mod users;

use std::path::Path;
use std::rc::Rc;

use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId};
use crate::manager::{Context, Manager};
use crate::shell::CommandRunner;
use crate::store::{JsonStore, StoreError};

pub use file::FileManager;
pub use flatpak::FlatpakManager;
pub use group::GroupManager;
pub use hook::PostHookManager;
pub use pacman::PackageManager;
pub use pacman_key::PacmanKeyManager;
pub use swapfile::SwapfileManager;
pub use systemd::SystemdUnitManager;
pub use users::UserManager;

const INSTALLED: &str = "installed";
const CONFIRM_MODES: &str = "confirm_modes";

/// The stock managers, in install order.
pub fn defaults(cache_dir: &Path, runner: Rc<dyn CommandRunner>) -> Result<Vec<Box<dyn Manager>>, StoreError> {
  Ok(vec![
    Box::new(PacmanKeyManager::new(Ledger::open(cache_dir, "PacmanKeyManager")?, runner.clone())),
    Box::new(PackageManager::new(Ledger::open(cache_dir, "PackageManager")?, runner.clone())),
    Box::new(UserManager::new(Ledger::open(cache_dir, "UserManager")?, runner.clone())),
    Box::new(GroupManager::new(Ledger::open(cache_dir, "GroupManager")?, runner.clone())),
    Box::new(FileManager::new(Ledger::open(cache_dir, "FileManager")?)),
    Box::new(SwapfileManager::new(Ledger::open(cache_dir, "SwapfileManager")?, runner.clone())),
    Box::new(FlatpakManager::new(Ledger::open(cache_dir, "FlatpakManager")?, runner.clone())),
    Box::new(SystemdUnitManager::new(Ledger::open(cache_dir, "SystemdUnitManager")?, runner.clone())),
    Box::new(PostHookManager::new(Ledger::open(cache_dir, "PostHookManager")?, runner)),
  ])
}

/// What a manager remembers between runs: the items it installed and the
/// confirm mode each one had when it was last declared.
///
/// Cheap to clone so that action effects can carry it.
#[derive(Debug, Clone)]
pub struct Ledger {
  store: Rc<JsonStore>,
}

impl Ledger {
  pub fn open(cache_dir: &Path, name: &str) -> Result<Self, StoreError> {
    Ok(Self::new(JsonStore::open(cache_dir, name)?))
  }

  pub fn new(store: JsonStore) -> Self {
    Self { store: Rc::new(store) }
  }

  /// The underlying store, for manager-specific entries.
  pub fn store(&self) -> &JsonStore {
    &self.store
  }

  pub fn installed(&self) -> Result<Vec<ItemId>, StoreError> {
    self.store.collection(INSTALLED).elements()
  }

  pub fn mode(&self, id: &ItemId) -> Result<Option<ConfirmMode>, StoreError> {
    self.store.mapping(CONFIRM_MODES).get(&id.to_string())
  }

  /// Remember `id` as installed with `mode`.
  pub fn record(&self, id: &ItemId, mode: ConfirmMode) -> Result<(), StoreError> {
    self.store.collection(INSTALLED).add(id.clone())?;
    self.store.mapping(CONFIRM_MODES).put(&id.to_string(), &mode)
  }

  pub fn forget(&self, id: &ItemId) -> Result<(), StoreError> {
    self.store.collection(INSTALLED).remove(id)?;
    self.store.mapping::<ConfirmMode>(CONFIRM_MODES).remove(&id.to_string())?;
    Ok(())
  }

  /// Installed items that `keep` no longer declares, with their stored modes.
  pub fn orphans(&self, keep: &[&ConfigItem]) -> Result<Vec<(ItemId, Option<ConfirmMode>)>, StoreError> {
    let kept: Vec<ItemId> = keep.iter().map(|item| item.id()).collect();
    self
      .installed()?
      .into_iter()
      .filter(|id| !kept.contains(id))
      .map(|id| {
        let mode = self.mode(&id)?;
        Ok((id, mode))
      })
      .collect()
  }

  /// Record every declared item with its current effective mode.
  ///
  /// Does nothing during a dry run.
  pub fn sync(&self, declared: &[&ConfigItem], ctx: &Context<'_>) -> Result<(), StoreError> {
    if ctx.dryrun {
      return Ok(());
    }
    for item in declared {
      let id = item.id();
      let mode = ctx.model.confirm_mode_of(&id);
      if !self.store.collection(INSTALLED).contains(&id)? || self.mode(&id)? != Some(mode) {
        self.record(&id, mode)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
pub(crate) mod testutil {
  //! Shared fixtures for manager tests.

  use std::rc::Rc;

  use tempfile::TempDir;

  use super::Ledger;
  use crate::action::Action;
  use crate::confirm::ConfirmMode;
  use crate::log::Logger;
  use crate::manager::{Context, Manager};
  use crate::model::Model;
  use crate::planner::build_model;
  use crate::section::Section;
  use crate::shell::RecordingRunner;

  pub struct Fixture {
    pub temp: TempDir,
    pub runner: Rc<RecordingRunner>,
    pub log: Logger,
  }

  impl Fixture {
    pub fn new() -> Self {
      Self {
        temp: TempDir::new().unwrap(),
        runner: Rc::new(RecordingRunner::new()),
        log: Logger::new(),
      }
    }

    pub fn ledger(&self, name: &str) -> Ledger {
      Ledger::open(self.temp.path(), name).unwrap()
    }

    pub fn model<M: Manager + 'static>(&self, manager: M, sections: Vec<Section>) -> Model {
      build_model(sections, vec![Box::new(manager)], ConfirmMode::Cautious).unwrap()
    }

    pub fn ctx<'a>(&'a self, model: &'a Model, dryrun: bool) -> Context<'a> {
      Context {
        model,
        dryrun,
        log: &self.log,
      }
    }
  }

  /// Install then cleanup actions of the only manager in `model`.
  pub fn actions(model: &Model, ctx: &Context<'_>) -> Vec<Action> {
    let manager = model.registry().get(0).unwrap();
    let mut actions = Vec::new();
    for step in model.steps() {
      let items: Vec<_> = step.items.iter().filter_map(|id| model.item(id)).collect();
      actions.extend(manager.plan_install(&items, ctx).unwrap());
    }
    let keep = ctx.declared(manager.managed_kinds());
    actions.extend(manager.plan_cleanup(&keep, ctx).unwrap());
    actions
  }

  pub fn descriptions(actions: &[Action]) -> Vec<String> {
    actions.iter().map(|a| a.description.clone()).collect()
  }

  /// Run every action, in order.
  pub fn run_all(actions: Vec<Action>) {
    for action in actions {
      action.run().unwrap();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::{ItemExt, Package};
  use crate::log::Logger;
  use crate::planner::build_model;
  use crate::section::Section;
  use crate::shell::RecordingRunner;
  use tempfile::TempDir;

  #[test]
  fn defaults_claim_every_managed_class() {
    let temp = TempDir::new().unwrap();
    let managers = defaults(temp.path(), Rc::new(RecordingRunner::new())).unwrap();
    let registry = crate::manager::ManagerRegistry::new(managers).unwrap();
    for kind in [
      crate::item::ItemKind::Package,
      crate::item::ItemKind::File,
      crate::item::ItemKind::Directory,
      crate::item::ItemKind::SystemdUnit,
      crate::item::ItemKind::Swapfile,
      crate::item::ItemKind::PacmanKey,
      crate::item::ItemKind::FlatpakRepo,
      crate::item::ItemKind::FlatpakPackage,
      crate::item::ItemKind::User,
      crate::item::ItemKind::UserShell,
      crate::item::ItemKind::UserHome,
      crate::item::ItemKind::GroupAssignment,
      crate::item::ItemKind::PostHook,
    ] {
      assert!(registry.manager_for(kind).is_some(), "{kind} has no manager");
    }
    assert_eq!(registry.get(0).map(|m| m.name()), Some("PacmanKeyManager"));
  }

  #[test]
  fn ledger_tracks_orphans_and_modes() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path(), "M").unwrap();
    ledger.record(&ItemId::package("vim"), ConfirmMode::Paranoid).unwrap();
    ledger.record(&ItemId::package("git"), ConfirmMode::Yolo).unwrap();

    let vim: ConfigItem = Package::new("vim").into();
    let orphans = ledger.orphans(&[&vim]).unwrap();
    assert_eq!(orphans, [(ItemId::package("git"), Some(ConfirmMode::Yolo))]);

    ledger.forget(&ItemId::package("git")).unwrap();
    assert_eq!(ledger.installed().unwrap(), [ItemId::package("vim")]);
    assert_eq!(ledger.mode(&ItemId::package("git")).unwrap(), None);
  }

  #[test]
  fn sync_skips_dry_runs() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path(), "M").unwrap();
    let model = build_model(
      vec![Section::new("a").item(Package::new("vim").confirm_mode(ConfirmMode::Paranoid))],
      defaults(temp.path(), Rc::new(RecordingRunner::new())).unwrap(),
      ConfirmMode::Cautious,
    )
    .unwrap();
    let log = Logger::new();
    let declared: Vec<&ConfigItem> = model.items().collect();

    let dry = Context {
      model: &model,
      dryrun: true,
      log: &log,
    };
    ledger.sync(&declared, &dry).unwrap();
    assert!(!ledger.store().path().exists());

    let wet = Context { dryrun: false, ..dry };
    ledger.sync(&declared, &wet).unwrap();
    assert_eq!(ledger.mode(&ItemId::package("vim")).unwrap(), Some(ConfirmMode::Paranoid));
  }
}
