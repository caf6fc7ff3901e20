//! Planning: turn a model into the ordered list of actions that would converge
//! the system.
//!
//! This module provides:
//! - [`build_model`]: registry, section merge, installability checks and scheduling
//! - [`plan`]: a dry run over every manager producing an [`ExecutionPlan`]
//! - [`PlanSummary`]: per-section and per-item change markers for display
//!
//! Planning and applying walk the managers the same way (see [`walk`]): every
//! manager is initialized, every install step is planned in schedule order,
//! cleanup runs in cleanup order and every manager is finalized. Only the dry
//! run flag and what happens to each emitted action differ.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::action::{Action, ActionKey, ChangeKind};
use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId};
use crate::log::Logger;
use crate::manager::{CleanupOrder, Context, Manager, ManagerError, ManagerRegistry, RegistryError};
use crate::model::Model;
use crate::schedule::{ScheduleError, schedule};
use crate::section::{Section, SectionError, merge_sections};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Section(#[from] SectionError),

  #[error(transparent)]
  Schedule(#[from] ScheduleError),

  #[error("{hook} is triggered by {trigger}; hooks cannot trigger other hooks")]
  HookTrigger { hook: ItemId, trigger: ItemId },

  #[error("{manager} failed during {stage}: {source}")]
  Manager {
    manager: String,
    stage: &'static str,
    #[source]
    source: ManagerError,
  },
}

impl PlanError {
  fn manager(manager: &dyn Manager, stage: &'static str, source: ManagerError) -> Self {
    PlanError::Manager {
      manager: manager.name().to_string(),
      stage,
      source,
    }
  }
}

/// A model together with the actions a dry run expects applying to produce.
pub struct ExecutionPlan {
  pub model: Model,
  pub expected_actions: Vec<ActionKey>,
}

impl ExecutionPlan {
  pub fn is_empty(&self) -> bool {
    self.expected_actions.is_empty()
  }
}

/// Which half of a run emitted an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Install,
  Cleanup,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
  pub phase: Phase,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub additional_info: Option<String>,
  pub change: ChangeKind,
  pub destructive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionSummary {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Strongest change to any item of the section; `None` if untouched.
  pub change: Option<ChangeKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
  pub item: String,
  pub change: Option<ChangeKind>,
  /// `false` for items only present because they are cleaned up.
  pub declared: bool,
}

/// What a plan would do, for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
  pub sections: Vec<SectionSummary>,
  pub items: Vec<ItemSummary>,
  pub actions: Vec<PlannedAction>,
}

impl PlanSummary {
  fn new(model: &Model, actions: &[(Phase, Action)]) -> Self {
    let mut changes: BTreeMap<ItemId, ChangeKind> = BTreeMap::new();
    for (_, action) in actions {
      for (id, kind) in action.changes() {
        let entry = changes.entry(id.clone()).or_insert(kind);
        *entry = (*entry).max(kind);
      }
    }

    let sections = model
      .sections()
      .iter()
      .map(|section| SectionSummary {
        name: section.name.clone(),
        description: section.description.clone(),
        change: section.items.iter().filter_map(|id| changes.get(id).copied()).max(),
      })
      .collect();

    let mut items: Vec<ItemSummary> = model
      .items()
      .filter(|item| item.is_managed())
      .map(|item| ItemSummary {
        item: item.id().to_string(),
        change: changes.get(&item.id()).copied(),
        declared: true,
      })
      .collect();
    items.extend(
      changes
        .iter()
        .filter(|(id, _)| !model.contains(id))
        .map(|(id, kind)| ItemSummary {
          item: id.to_string(),
          change: Some(*kind),
          declared: false,
        }),
    );

    let actions = actions
      .iter()
      .map(|(phase, action)| PlannedAction {
        phase: *phase,
        description: action.description.clone(),
        additional_info: action.additional_info.clone(),
        change: action.changes().map(|(_, kind)| kind).max().unwrap_or(ChangeKind::Update),
        destructive: action.is_destructive(),
      })
      .collect();

    Self {
      sections,
      items,
      actions,
    }
  }
}

/// Merge, check and schedule the configuration.
pub fn build_model(
  sections: Vec<Section>,
  managers: Vec<Box<dyn Manager>>,
  default_confirm_mode: ConfirmMode,
) -> Result<Model, PlanError> {
  let registry = ManagerRegistry::new(managers)?;
  let config = merge_sections(sections)?;
  info!(
    sections = config.sections.len(),
    items = config.items.len(),
    managers = registry.len(),
    "merged configuration"
  );

  for item in config.items.values().filter(|item| item.is_managed()) {
    registry.require(item)?;
    if let ConfigItem::PostHook(hook) = item
      && let Some(trigger) = hook.triggers.iter().find(|t| t.kind == item.kind())
    {
      return Err(PlanError::HookTrigger {
        hook: item.id(),
        trigger: trigger.clone(),
      });
    }
  }

  let steps = schedule(&config, &registry)?;
  let model = Model::new(config, registry, steps, default_confirm_mode);

  for item in model.items().filter(|item| item.is_managed()) {
    if let Some(manager) = model.manager(&item.id()) {
      manager
        .assert_installable(item, &model)
        .map_err(|e| PlanError::manager(manager, "assert_installable", e))?;
    }
  }

  debug!(steps = model.steps().len(), "model built");
  Ok(model)
}

/// Dry-run every manager over the model.
///
/// Nothing on the system or in any store changes. The returned plan records
/// the key of every action so that [`crate::execute::apply`] can detect
/// divergence between plan and reality.
pub fn plan(model: Model, log: &Logger) -> Result<(ExecutionPlan, PlanSummary), PlanError> {
  let mut actions: Vec<(Phase, Action)> = Vec::new();
  walk(&model, true, log, |phase, action| {
    actions.push((phase, action));
    Ok::<_, PlanError>(())
  })?;

  let summary = PlanSummary::new(&model, &actions);
  let expected_actions = actions.iter().map(|(_, action)| action.key()).collect();
  info!(actions = actions.len(), "plan computed");

  Ok((
    ExecutionPlan {
      model,
      expected_actions,
    },
    summary,
  ))
}

/// Registry indices in cleanup order: `First` managers, then the rest in
/// reverse install order, then `Last` managers.
pub fn cleanup_order(registry: &ManagerRegistry) -> Vec<usize> {
  let mut order: Vec<usize> = (0..registry.len()).collect();
  order.sort_by_key(|&i| {
    let bucket = registry
      .get(i)
      .map(|m| m.cleanup_order())
      .unwrap_or(CleanupOrder::ReverseInstallOrder);
    let within = match bucket {
      CleanupOrder::ReverseInstallOrder => registry.len() - i,
      CleanupOrder::First | CleanupOrder::Last => i,
    };
    (bucket, within)
  });
  order
}

/// Drive every manager through one full lifecycle, handing each emitted
/// action to `visit` as soon as it is produced.
pub(crate) fn walk<E, F>(model: &Model, dryrun: bool, log: &Logger, mut visit: F) -> Result<(), E>
where
  E: From<PlanError>,
  F: FnMut(Phase, Action) -> Result<(), E>,
{
  let ctx = Context { model, dryrun, log };
  let registry = model.registry();

  for manager in registry.managers() {
    manager
      .initialize(&ctx)
      .map_err(|e| PlanError::manager(manager, "initialize", e))?;
  }

  for (index, step) in model.steps().iter().enumerate() {
    let Some(manager) = model.step_manager(step) else {
      continue;
    };
    let items: Vec<&ConfigItem> = step.items.iter().filter_map(|id| model.item(id)).collect();
    debug!(step = index, manager = manager.name(), items = items.len(), dryrun, "planning step");

    let actions = manager
      .plan_install(&items, &ctx)
      .map_err(|e| PlanError::manager(manager, "plan_install", e))?;
    for action in actions {
      visit(Phase::Install, action)?;
    }
  }

  for index in cleanup_order(registry) {
    let Some(manager) = registry.get(index) else {
      continue;
    };
    let keep: Vec<&ConfigItem> = model
      .items()
      .filter(|item| manager.managed_kinds().contains(&item.kind()))
      .collect();
    debug!(manager = manager.name(), keep = keep.len(), dryrun, "planning cleanup");

    let actions = manager
      .plan_cleanup(&keep, &ctx)
      .map_err(|e| PlanError::manager(manager, "plan_cleanup", e))?;
    for action in actions {
      visit(Phase::Cleanup, action)?;
    }
  }

  for manager in registry.managers() {
    manager
      .finalize(&ctx)
      .map_err(|e| PlanError::manager(manager, "finalize", e))?;
  }

  Ok(())
}
