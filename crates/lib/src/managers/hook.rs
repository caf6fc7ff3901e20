//! Post hooks.
//!
//! A hook remembers the hash of its triggers' target states at the time it
//! last fired. It fires again exactly when that hash changes: a trigger's
//! declaration changed, a trigger was added, or a trigger went away. A trigger
//! that is not declared contributes a fixed marker instead of a state.

use std::rc::Rc;

use tracing::{debug, info};

use super::Ledger;
use crate::action::{Action, ActionError};
use crate::consts::ABSENT_TRIGGER_MARKER;
use crate::item::{ConfigItem, HookBody, ItemKind, PostHook};
use crate::manager::{CleanupOrder, Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::CommandRunner;
use crate::state::ItemState;
use crate::util::hash::{ContentHash, hash_bytes};

/// Store entry mapping hook ids to the trigger hash they last fired for.
const FIRED: &str = "fired";

pub struct PostHookManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl PostHookManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  fn last_fired(&self, hook: &PostHook) -> Result<Option<ContentHash>, ManagerError> {
    Ok(self.ledger.store().mapping(FIRED).get(&hook.id().to_string())?)
  }

  /// Hash over the target states of every trigger, in trigger order.
  fn trigger_hash(&self, hook: &PostHook, ctx: &Context<'_>) -> Result<ContentHash, ManagerError> {
    let mut parts = Vec::with_capacity(hook.triggers.len());
    for trigger in &hook.triggers {
      let state = match ctx.model.item(trigger) {
        Some(item) => ctx.model.registry().state_target(item, ctx)?,
        None => None,
      };
      parts.push(match state {
        Some(state) => format!("{}:{}", trigger, state.sha256()),
        None => format!("{}:{}", ABSENT_TRIGGER_MARKER, trigger),
      });
    }
    Ok(hash_bytes(parts.join("\n").as_bytes()))
  }
}

fn fire(name: &str, body: Option<&HookBody>, runner: &dyn CommandRunner) -> Result<(), ActionError> {
  match body {
    Some(HookBody::Command(cmd)) => runner.run(cmd)?,
    Some(HookBody::Closure(f)) => f().map_err(|source| ActionError::Hook {
      name: name.to_string(),
      source,
    })?,
    None => debug!(hook = %name, "hook has no body"),
  }
  Ok(())
}

impl Manager for PostHookManager {
  fn name(&self) -> &str {
    "PostHookManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::PostHook]
  }

  fn cleanup_order(&self) -> CleanupOrder {
    CleanupOrder::First
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::PostHook(hook) if hook.triggers.is_empty() => {
        Err(ManagerError::invalid(item.id(), "a hook needs at least one trigger"))
      }
      ConfigItem::PostHook(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::PostHook(hook) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    Ok(self.last_fired(hook)?.map(ItemState::from_hash))
  }

  fn state_target(&self, item: &ConfigItem, ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::PostHook(hook) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    Ok(Some(ItemState::from_hash(self.trigger_hash(hook, ctx)?)))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for item in items {
      let ConfigItem::PostHook(hook) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      let fired = self.last_fired(hook)?;
      let target = self.trigger_hash(hook, ctx)?;
      if fired.as_ref() == Some(&target) {
        continue;
      }

      let id = item.id();
      let mode = ctx.model.confirm_mode_of(&id);
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let recorded = id.clone();
      let name = hook.name.clone();
      let body = hook.body.clone();
      let action = Action::new(format!("run hook {}", hook.name), move || {
        info!(hook = %name, "firing");
        fire(&name, body.as_ref(), runner.as_ref())?;
        ledger.store().mapping(FIRED).put(&recorded.to_string(), &target)?;
        ledger.record(&recorded, mode)?;
        Ok(())
      })
      .info(
        hook
          .triggers
          .iter()
          .map(|t| t.to_string())
          .collect::<Vec<_>>()
          .join(", "),
      );

      actions.push(match fired {
        Some(_) => action.updates([id]),
        None => action.installs([id]),
      });
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    Ok(
      self
        .ledger
        .orphans(keep)?
        .into_iter()
        .map(|(id, mode)| {
          let ledger = self.ledger.clone();
          let forgotten = id.clone();
          Action::new(format!("forget hook {}", id.key), move || {
            debug!(hook = %forgotten, "forgetting hook");
            ledger.store().mapping::<ContentHash>(FIRED).remove(&forgotten.to_string())?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
          .removes([id])
          .confirm_mode(mode)
        })
        .collect(),
    )
  }
}
