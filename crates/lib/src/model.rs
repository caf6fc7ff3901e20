//! The merged, scheduled configuration.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemKind, OptionError, OptionValues};
use crate::manager::{Manager, ManagerRegistry};
use crate::section::{MergedConfig, MergedSection};

/// Items one manager installs in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
  /// Index of the manager in the registry.
  pub manager: usize,
  /// In declaration order.
  pub items: Vec<ItemId>,
}

pub struct Model {
  sections: Vec<MergedSection>,
  items: BTreeMap<ItemId, ConfigItem>,
  order: Vec<ItemId>,
  membership: BTreeMap<ItemId, Vec<String>>,
  steps: Vec<InstallStep>,
  registry: ManagerRegistry,
  default_confirm_mode: ConfirmMode,
}

impl Model {
  pub(crate) fn new(
    config: MergedConfig,
    registry: ManagerRegistry,
    steps: Vec<InstallStep>,
    default_confirm_mode: ConfirmMode,
  ) -> Self {
    Self {
      sections: config.sections,
      items: config.items,
      order: config.order,
      membership: config.membership,
      steps,
      registry,
      default_confirm_mode,
    }
  }

  /// Active sections sorted by name.
  pub fn sections(&self) -> &[MergedSection] {
    &self.sections
  }

  pub fn steps(&self) -> &[InstallStep] {
    &self.steps
  }

  pub fn registry(&self) -> &ManagerRegistry {
    &self.registry
  }

  pub fn default_confirm_mode(&self) -> ConfirmMode {
    self.default_confirm_mode
  }

  pub fn item(&self, id: &ItemId) -> Option<&ConfigItem> {
    self.items.get(id)
  }

  pub fn contains(&self, id: &ItemId) -> bool {
    self.items.contains_key(id)
  }

  pub fn contains_where<F>(&self, predicate: F) -> bool
  where
    F: Fn(&ConfigItem) -> bool,
  {
    self.items.values().any(predicate)
  }

  /// All items in declaration order.
  pub fn items(&self) -> impl Iterator<Item = &ConfigItem> {
    self.order.iter().filter_map(|id| self.items.get(id))
  }

  pub fn items_of_kind(&self, kind: ItemKind) -> Vec<&ConfigItem> {
    self.items().filter(|item| item.kind() == kind).collect()
  }

  /// Names of the sections declaring `id`.
  pub fn sections_of(&self, id: &ItemId) -> &[String] {
    self.membership.get(id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Strictest of the item's own mode, its sections' modes and the default.
  pub fn confirm_mode_of(&self, id: &ItemId) -> ConfirmMode {
    let own = self.item(id).and_then(|item| item.meta().confirm_mode);
    let sections = self
      .sections_of(id)
      .iter()
      .filter_map(|name| self.sections.iter().find(|s| &s.name == name))
      .filter_map(|s| s.confirm_mode);
    ConfirmMode::strictest(self.default_confirm_mode, own.into_iter().chain(sections))
  }

  /// Merged values of an option; an undeclared option has none.
  pub fn option<T: DeserializeOwned>(&self, name: &str) -> Result<OptionValues<T>, OptionError> {
    match self.items.get(&ItemId::option(name)) {
      Some(ConfigItem::Option(option)) => option.typed(),
      _ => Ok(OptionValues::empty(name)),
    }
  }

  /// Manager responsible for `id`.
  pub fn manager(&self, id: &ItemId) -> Option<&dyn Manager> {
    self.registry.manager_for(id.kind)
  }

  pub fn step_manager(&self, step: &InstallStep) -> Option<&dyn Manager> {
    self.registry.get(step.manager)
  }
}
