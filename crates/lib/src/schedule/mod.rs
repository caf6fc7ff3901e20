//! Install scheduling.
//!
//! Turns the merged configuration into an ordered list of [`InstallStep`]s:
//! every step is handled by a single manager, and every ordering constraint
//! between items is honoured by the step order.
//!
//! Constraints come from four places:
//! - declaration order inside a section (strict when the manager changes)
//! - item and section `requires`
//! - `before`/`after` predicates of items and sections
//! - intrinsic ordering between item classes (keys before packages, users
//!   before the things they own, hooks after their triggers)

mod dag;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;
use tracing::debug;

use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::manager::ManagerRegistry;
use crate::model::InstallStep;
use crate::section::{MergedConfig, Requirement};

use dag::ConstraintGraph;

#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error("no manager handles {0}")]
  NoManager(ItemId),

  #[error("{item} requires {required}, which is not declared")]
  UnknownItem { item: String, required: ItemId },

  #[error("section '{section}' requires section '{required}', which is not declared")]
  UnknownSection { section: String, required: String },

  #[error("{}", render_infeasible(.items, .constraints))]
  Infeasible {
    /// Minimal set of items whose constraints contradict each other.
    items: Vec<ItemId>,
    constraints: Vec<String>,
  },
}

fn render_infeasible(items: &[ItemId], constraints: &[String]) -> String {
  let mut out = String::from("ordering constraints cannot be satisfied; conflicting items:");
  for item in items {
    let _ = write!(out, "\n  {}", item);
  }
  out.push_str("\nconstraints:");
  for constraint in constraints {
    let _ = write!(out, "\n  {}", constraint);
  }
  out
}

/// Which manager lane a scheduled item runs in.
///
/// Managers sort by registry position; checkpoints sort after every manager
/// and never form a step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
  Manager(usize),
  Checkpoint(ItemId),
}

/// Compute install steps for the managed items of `config`.
pub fn schedule(config: &MergedConfig, registry: &ManagerRegistry) -> Result<Vec<InstallStep>, ScheduleError> {
  let nodes: Vec<&ConfigItem> = config
    .order
    .iter()
    .filter_map(|id| config.items.get(id))
    .filter(|item| item.kind() != ItemKind::Option)
    .collect();
  let index: BTreeMap<ItemId, usize> = nodes.iter().enumerate().map(|(i, item)| (item.id(), i)).collect();

  let lanes = nodes
    .iter()
    .map(|item| match item {
      ConfigItem::Checkpoint(_) => Ok(Lane::Checkpoint(item.id())),
      _ => registry
        .index_of(item.kind())
        .map(Lane::Manager)
        .ok_or_else(|| ScheduleError::NoManager(item.id())),
    })
    .collect::<Result<Vec<_>, _>>()?;

  let mut graph = ConstraintGraph::new(lanes);

  // Declaration order.
  for section in &config.sections {
    let scheduled: Vec<usize> = section.items.iter().filter_map(|id| index.get(id).copied()).collect();
    for pair in scheduled.windows(2) {
      let (a, b) = (pair[0], pair[1]);
      let weight = if graph.lane(a) == graph.lane(b) { 0 } else { 1 };
      graph.constrain(
        a,
        b,
        weight,
        format!("{} is declared before {} in section '{}'", nodes[a].id(), nodes[b].id(), section.name),
      );
    }
  }

  // Item requirements.
  for (i, item) in nodes.iter().enumerate() {
    for required in &item.meta().requires {
      if !config.items.contains_key(required) {
        return Err(ScheduleError::UnknownItem {
          item: item.id().to_string(),
          required: required.clone(),
        });
      }
      if let Some(&r) = index.get(required) {
        graph.constrain(r, i, 1, format!("{} requires {}", item.id(), required));
      }
    }
  }

  // Section requirements.
  for section in &config.sections {
    let dependents: Vec<usize> = section.items.iter().filter_map(|id| index.get(id).copied()).collect();

    for requirement in &section.requires {
      let (prerequisites, label): (Vec<usize>, String) = match requirement {
        Requirement::Section(name) => {
          if !config.is_declared_section(name) {
            return Err(ScheduleError::UnknownSection {
              section: section.name.clone(),
              required: name.clone(),
            });
          }
          let items = config
            .section(name)
            .map(|s| s.items.iter().filter_map(|id| index.get(id).copied()).collect())
            .unwrap_or_default();
          (items, format!("section '{}'", name))
        }
        Requirement::Item(id) => {
          if !config.items.contains_key(id) {
            return Err(ScheduleError::UnknownItem {
              item: format!("section '{}'", section.name),
              required: id.clone(),
            });
          }
          (index.get(id).copied().into_iter().collect(), id.to_string())
        }
      };

      for &p in &prerequisites {
        for &d in &dependents {
          graph.constrain(
            p,
            d,
            1,
            format!(
              "section '{}' requires {} ({} before {})",
              section.name,
              label,
              nodes[p].id(),
              nodes[d].id()
            ),
          );
        }
      }
    }
  }

  // Predicates and intrinsic ordering.
  for (i, a) in nodes.iter().enumerate() {
    for (j, b) in nodes.iter().enumerate() {
      if i == j {
        continue;
      }
      if a.before(b) {
        graph.constrain(i, j, 1, format!("{} must come before {}", a.id(), b.id()));
      } else if b.after(a) {
        graph.constrain(i, j, 1, format!("{} must come after {}", b.id(), a.id()));
      }
    }
  }

  let layers = match graph.layers() {
    Ok(layers) => layers,
    Err(contradiction) => {
      let subset = graph.irreducible_subset(&contradiction);
      let constraints = graph
        .constraints_among(&subset)
        .into_iter()
        .map(|c| c.reason.clone())
        .collect();
      return Err(ScheduleError::Infeasible {
        items: subset.iter().map(|&n| nodes[n].id()).collect(),
        constraints,
      });
    }
  };

  let steps: Vec<InstallStep> = layers
    .into_iter()
    .filter_map(|layer| match graph.lane(layer[0]) {
      Lane::Manager(manager) => Some(InstallStep {
        manager: *manager,
        items: layer.iter().map(|&n| nodes[n].id()).collect(),
      }),
      Lane::Checkpoint(_) => None,
    })
    .collect();

  debug!(steps = steps.len(), items = nodes.len(), "scheduled");
  Ok(steps)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::Action;
  use crate::item::{
    Checkpoint, File, GroupAssignment, ItemExt, ItemPredicate, OptionItem, Package, PacmanKey, PostHook, User,
  };
  use crate::manager::{Context, Manager, ManagerError};
  use crate::section::{Section, merge_sections};
  use crate::state::ItemState;

  struct Fake(&'static str, Vec<ItemKind>);

  impl Manager for Fake {
    fn name(&self) -> &str {
      self.0
    }
    fn managed_kinds(&self) -> &[ItemKind] {
      &self.1
    }
    fn state_current(&self, _item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
      Ok(None)
    }
    fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
      Ok(None)
    }
    fn plan_install(&self, _items: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
      Ok(Vec::new())
    }
    fn plan_cleanup(&self, _keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
      Ok(Vec::new())
    }
  }

  fn registry() -> ManagerRegistry {
    ManagerRegistry::new(vec![
      Box::new(Fake("keys", vec![ItemKind::PacmanKey])),
      Box::new(Fake("packages", vec![ItemKind::Package])),
      Box::new(Fake("users", vec![ItemKind::User, ItemKind::GroupAssignment])),
      Box::new(Fake("files", vec![ItemKind::File])),
      Box::new(Fake("hooks", vec![ItemKind::PostHook])),
    ])
    .unwrap()
  }

  fn run(sections: Vec<Section>) -> Result<Vec<InstallStep>, ScheduleError> {
    let config = merge_sections(sections).unwrap();
    schedule(&config, &registry())
  }

  fn step_of(steps: &[InstallStep], id: &ItemId) -> usize {
    steps.iter().position(|s| s.items.contains(id)).unwrap()
  }

  #[test]
  fn same_manager_items_share_a_step() {
    let steps = run(vec![
      Section::new("a").item(Package::new("x")).item(Package::new("y")),
      Section::new("b").item(Package::new("z")),
    ])
    .unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(
      steps[0].items,
      [ItemId::package("x"), ItemId::package("y"), ItemId::package("z")]
    );
  }

  #[test]
  fn declaration_order_splits_on_manager_change() {
    let steps = run(vec![Section::new("a")
      .item(Package::new("x"))
      .item(File::new("/etc/x"))
      .item(Package::new("y"))])
    .unwrap();

    assert_eq!(steps.len(), 3);
    assert!(step_of(&steps, &ItemId::package("x")) < step_of(&steps, &ItemId::file("/etc/x")));
    assert!(step_of(&steps, &ItemId::file("/etc/x")) < step_of(&steps, &ItemId::package("y")));
  }

  #[test]
  fn requires_across_sections() {
    let steps = run(vec![
      Section::new("a").item(Package::new("paru")),
      Section::new("b").item(File::new("/etc/paru.conf").requires(ItemId::package("paru"))),
    ])
    .unwrap();
    assert!(step_of(&steps, &ItemId::package("paru")) < step_of(&steps, &ItemId::file("/etc/paru.conf")));
  }

  #[test]
  fn section_requires_section() {
    let steps = run(vec![
      Section::new("a").requires_section("z").item(File::new("/etc/a")),
      Section::new("z").item(File::new("/etc/z")).item(Package::new("p")),
    ])
    .unwrap();
    let a = step_of(&steps, &ItemId::file("/etc/a"));
    assert!(step_of(&steps, &ItemId::file("/etc/z")) < a);
    assert!(step_of(&steps, &ItemId::package("p")) < a);
  }

  #[test]
  fn unknown_requirements_are_errors() {
    let err = run(vec![Section::new("a").item(File::new("/x").requires(ItemId::package("nope")))]).unwrap_err();
    assert!(matches!(err, ScheduleError::UnknownItem { .. }));

    let err = run(vec![Section::new("a").requires_section("nope").item(File::new("/x"))]).unwrap_err();
    assert!(matches!(err, ScheduleError::UnknownSection { .. }));

    // Declared but disabled sections are satisfied trivially.
    let steps = run(vec![
      Section::new("a").requires_section("off").item(File::new("/x")),
      Section::new("off").enabled(false).item(File::new("/y")),
    ])
    .unwrap();
    assert_eq!(steps.len(), 1);
  }

  #[test]
  fn cycle_reports_irreducible_subset() {
    let err = run(vec![
      Section::new("a")
        .item(Package::new("x").requires(ItemId::file("/etc/y")))
        .item(Package::new("bystander")),
      Section::new("b").item(File::new("/etc/y").requires(ItemId::package("x"))),
    ])
    .unwrap_err();

    match err {
      ScheduleError::Infeasible { items, constraints } => {
        assert_eq!(items, [ItemId::package("x"), ItemId::file("/etc/y")]);
        assert!(constraints.iter().any(|c| c == "Package('x') requires File('/etc/y')"));
        assert!(constraints.iter().any(|c| c == "File('/etc/y') requires Package('x')"));
      }
      other => panic!("unexpected {other}"),
    }
  }

  #[test]
  fn predicate_against_declaration_order_is_infeasible() {
    let err = run(vec![Section::new("a")
      .item(Package::new("vim"))
      .item(File::new("/etc/motd").before(ItemPredicate::kind(ItemKind::Package)))])
    .unwrap_err();
    assert!(matches!(err, ScheduleError::Infeasible { .. }));
  }

  #[test]
  fn intrinsic_ordering() {
    let steps = run(vec![
      Section::new("a")
        .item(PacmanKey::new("K", "hkps://keys"))
        .item(Package::new("vim"))
        .item(User::new("alice")),
      Section::new("b")
        .item(GroupAssignment::new("alice", "wheel"))
        .item(File::new("/home/alice/.vimrc").owner("alice")),
    ])
    .unwrap();
    assert!(step_of(&steps, &ItemId::pacman_key("K")) < step_of(&steps, &ItemId::package("vim")));
    assert!(step_of(&steps, &ItemId::user("alice")) < step_of(&steps, &ItemId::group_assignment("alice", "wheel")));
    assert!(step_of(&steps, &ItemId::user("alice")) < step_of(&steps, &ItemId::file("/home/alice/.vimrc")));
  }

  #[test]
  fn hooks_follow_triggers_and_checkpoints_vanish() {
    let steps = run(vec![
      Section::new("a").item(Checkpoint::new("base")).item(OptionItem::new("o").value(1)),
      Section::new("b").item(File::new("/etc/locale.gen").requires(ItemId::checkpoint("base"))),
      Section::new("c").item(PostHook::new("regen").trigger(ItemId::file("/etc/locale.gen"))),
    ])
    .unwrap();

    assert!(step_of(&steps, &ItemId::file("/etc/locale.gen")) < step_of(&steps, &ItemId::hook("regen")));
    assert!(steps.iter().all(|s| !s.items.contains(&ItemId::checkpoint("base"))));
    assert!(steps.iter().all(|s| !s.items.contains(&ItemId::option("o"))));
  }

  #[test]
  fn steps_are_homogeneous() {
    let registry = registry();
    let steps = run(vec![
      Section::new("a").item(Package::new("a")).item(File::new("/a")),
      Section::new("b").item(File::new("/b")).item(Package::new("b")),
      Section::new("c").item(User::new("c")),
    ])
    .unwrap();

    for step in &steps {
      let kinds: Vec<ItemKind> = step.items.iter().map(|id| id.kind).collect();
      assert!(kinds.iter().all(|k| registry.index_of(*k) == Some(step.manager)));
    }
  }
}
