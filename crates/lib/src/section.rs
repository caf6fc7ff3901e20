//! Sections and the section merge.
//!
//! A section groups the items of one concern ("base system", "desktop") with
//! a description, a confirm mode, tags and ordering hints that apply to all of
//! them. The merge folds every declaration of the same item identity into one
//! representative, walking sections in name order so that the result does not
//! depend on the order in which sections were supplied.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemPredicate, MergeConflict};

/// What a section depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
  /// Every item of the named section.
  Section(String),
  Item(ItemId),
}

#[derive(Debug, Clone)]
pub struct Section {
  pub name: String,
  pub description: Option<String>,
  pub enabled: bool,
  pub confirm_mode: Option<ConfirmMode>,
  pub tags: BTreeSet<String>,
  pub requires: Vec<Requirement>,
  pub before: Vec<ItemPredicate>,
  pub after: Vec<ItemPredicate>,
  pub items: Vec<ConfigItem>,
}

impl Section {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
      enabled: true,
      confirm_mode: None,
      tags: BTreeSet::new(),
      requires: Vec::new(),
      before: Vec::new(),
      after: Vec::new(),
      items: Vec::new(),
    }
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn confirm_mode(mut self, mode: ConfirmMode) -> Self {
    self.confirm_mode = Some(mode);
    self
  }

  pub fn tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }

  pub fn requires_section(mut self, name: impl Into<String>) -> Self {
    self.requires.push(Requirement::Section(name.into()));
    self
  }

  pub fn requires_item(mut self, id: ItemId) -> Self {
    self.requires.push(Requirement::Item(id));
    self
  }

  /// Every item of this section comes before every item matching `predicate`.
  pub fn before(mut self, predicate: ItemPredicate) -> Self {
    self.before.push(predicate);
    self
  }

  /// Every item of this section comes after every item matching `predicate`.
  pub fn after(mut self, predicate: ItemPredicate) -> Self {
    self.after.push(predicate);
    self
  }

  pub fn item(mut self, item: impl Into<ConfigItem>) -> Self {
    self.items.push(item.into());
    self
  }

  pub fn items<I, T>(mut self, items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<ConfigItem>,
  {
    self.items.extend(items.into_iter().map(Into::into));
    self
  }

  /// Whether the section contributes anything to the model.
  pub fn is_active(&self) -> bool {
    self.enabled && !self.items.is_empty()
  }
}

/// A section after the merge: same attributes, items replaced by their ids.
#[derive(Debug, Clone)]
pub struct MergedSection {
  pub name: String,
  pub description: Option<String>,
  pub confirm_mode: Option<ConfirmMode>,
  pub tags: BTreeSet<String>,
  pub requires: Vec<Requirement>,
  /// Provides list in declaration order, without duplicates.
  pub items: Vec<ItemId>,
}

#[derive(Debug, Error)]
pub enum SectionError {
  #[error("section '{0}' is declared more than once")]
  DuplicateSection(String),

  #[error("sections '{first}' and '{second}' disagree: {conflict}")]
  Conflict {
    first: String,
    second: String,
    #[source]
    conflict: MergeConflict,
  },
}

/// The outcome of merging all sections.
#[derive(Debug, Clone, Default)]
pub struct MergedConfig {
  /// Active sections sorted by name.
  pub sections: Vec<MergedSection>,
  /// One representative per identity.
  pub items: BTreeMap<ItemId, ConfigItem>,
  /// Every identity in first-declared order (sections by name, items by position).
  pub order: Vec<ItemId>,
  /// Names of the sections declaring each item, sorted.
  pub membership: BTreeMap<ItemId, Vec<String>>,
  /// Sections that were declared but disabled or empty.
  pub inactive: Vec<String>,
}

impl MergedConfig {
  pub fn section(&self, name: &str) -> Option<&MergedSection> {
    self.sections.iter().find(|s| s.name == name)
  }

  pub fn is_declared_section(&self, name: &str) -> bool {
    self.section(name).is_some() || self.inactive.iter().any(|s| s == name)
  }
}

/// Attach the section-wide attributes to an item.
fn propagate(section: &Section, mut item: ConfigItem) -> ConfigItem {
  let meta = item.meta_mut();
  meta.tags.extend(section.tags.iter().cloned());
  meta.before.extend(section.before.iter().cloned());
  meta.after.extend(section.after.iter().cloned());
  item
}

/// Merge every declaration of every item across sections.
pub fn merge_sections(sections: Vec<Section>) -> Result<MergedConfig, SectionError> {
  let mut names = HashSet::new();
  for section in &sections {
    if !names.insert(section.name.clone()) {
      return Err(SectionError::DuplicateSection(section.name.clone()));
    }
  }

  let mut sections = sections;
  sections.sort_by(|a, b| a.name.cmp(&b.name));

  let mut merged = MergedConfig::default();

  for section in sections {
    if !section.is_active() {
      debug!(section = %section.name, enabled = section.enabled, "skipping inactive section");
      merged.inactive.push(section.name);
      continue;
    }

    let mut provides: Vec<ItemId> = Vec::new();

    for item in &section.items {
      let item = propagate(&section, item.clone());
      let id = item.id();

      let representative = match merged.items.remove(&id) {
        Some(previous) => previous.merge(&item).map_err(|conflict| SectionError::Conflict {
          first: merged
            .membership
            .get(&id)
            .and_then(|m| m.first())
            .cloned()
            .unwrap_or_else(|| section.name.clone()),
          second: section.name.clone(),
          conflict,
        })?,
        None => {
          merged.order.push(id.clone());
          item
        }
      };
      merged.items.insert(id.clone(), representative);

      let members = merged.membership.entry(id.clone()).or_default();
      if !members.contains(&section.name) {
        members.push(section.name.clone());
      }
      if !provides.contains(&id) {
        provides.push(id);
      }
    }

    merged.sections.push(MergedSection {
      name: section.name,
      description: section.description,
      confirm_mode: section.confirm_mode,
      tags: section.tags,
      requires: section.requires,
      items: provides,
    });
  }

  Ok(merged)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::{File, ItemExt, OptionItem, Package};

  #[test]
  fn sections_are_sorted_and_inactive_dropped() {
    let merged = merge_sections(vec![
      Section::new("b").item(Package::new("x")),
      Section::new("a").item(Package::new("y")),
      Section::new("c"),
      Section::new("d").enabled(false).item(Package::new("z")),
    ])
    .unwrap();

    let names: Vec<_> = merged.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(merged.inactive, ["c", "d"]);
    assert!(!merged.items.contains_key(&ItemId::package("z")));
    assert_eq!(merged.order, [ItemId::package("y"), ItemId::package("x")]);
    assert!(merged.is_declared_section("d"));
    assert!(!merged.is_declared_section("e"));
  }

  #[test]
  fn duplicate_section_names_are_rejected() {
    let err = merge_sections(vec![Section::new("a"), Section::new("a")]).unwrap_err();
    assert!(matches!(err, SectionError::DuplicateSection(name) if name == "a"));
  }

  #[test]
  fn items_merge_across_sections() {
    let merged = merge_sections(vec![
      Section::new("b").item(OptionItem::new("noextract").value("b")),
      Section::new("a").item(OptionItem::new("noextract").value("a")),
    ])
    .unwrap();

    let id = ItemId::option("noextract");
    match &merged.items[&id] {
      ConfigItem::Option(option) => assert_eq!(option.values, ["a", "b"]),
      other => panic!("unexpected {other:?}"),
    }
    assert_eq!(merged.membership[&id], ["a", "b"]);
    assert_eq!(merged.order, [id.clone()]);
    assert_eq!(merged.sections[0].items, [id.clone()]);
    assert_eq!(merged.sections[1].items, [id]);
  }

  #[test]
  fn conflict_names_both_sections() {
    let err = merge_sections(vec![
      Section::new("a").item(File::new("/etc/x").content("a")),
      Section::new("b").item(File::new("/etc/x").content("b")),
    ])
    .unwrap_err();

    match err {
      SectionError::Conflict { first, second, conflict } => {
        assert_eq!(first, "a");
        assert_eq!(second, "b");
        assert_eq!(conflict.id, ItemId::file("/etc/x"));
      }
      other => panic!("unexpected {other}"),
    }
  }

  #[test]
  fn section_attributes_propagate_to_items() {
    let merged = merge_sections(vec![
      Section::new("desktop")
        .tag("gui")
        .after(ItemPredicate::kind(crate::item::ItemKind::User))
        .item(Package::new("firefox").tag("browser")),
    ])
    .unwrap();

    let item = &merged.items[&ItemId::package("firefox")];
    assert!(item.meta().tags.contains("gui"));
    assert!(item.meta().tags.contains("browser"));
    assert_eq!(item.meta().after.len(), 1);
  }

  #[test]
  fn repeated_item_in_one_section_listed_once() {
    let merged = merge_sections(vec![
      Section::new("a")
        .item(Package::new("x"))
        .item(Package::new("x").url("https://example.org/x.pkg.tar.zst")),
    ])
    .unwrap();

    assert_eq!(merged.sections[0].items, [ItemId::package("x")]);
    match &merged.items[&ItemId::package("x")] {
      ConfigItem::Package(p) => assert!(p.url.is_some()),
      other => panic!("unexpected {other:?}"),
    }
  }
}
