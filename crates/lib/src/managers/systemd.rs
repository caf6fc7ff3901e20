//! Systemd units, system-wide or in a user's manager.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use super::Ledger;
use crate::action::Action;
use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::manager::{CleanupOrder, Context, Manager, ManagerError};
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

/// `systemctl`, addressing the user manager of `user` if given.
fn systemctl(user: Option<&str>) -> Cmd {
  match user {
    Some(user) => Cmd::new("systemctl").args(["--user", "-M"]).arg(format!("{}@", user)),
    None => Cmd::new("systemctl"),
  }
}

pub struct SystemdUnitManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl SystemdUnitManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  fn is_enabled(&self, name: &str, user: Option<&str>) -> Result<bool, ManagerError> {
    let output = self.runner.capture(&systemctl(user).args(["is-enabled", name]))?;
    Ok(output.success && output.lines().next() == Some("enabled"))
  }
}

fn enabled() -> ItemState {
  ItemState::from_bytes(b"enabled")
}

fn scope_info(user: &Option<String>) -> Option<String> {
  user.as_ref().map(|u| format!("user {}", u))
}

impl Manager for SystemdUnitManager {
  fn name(&self) -> &str {
    "SystemdUnitManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::SystemdUnit]
  }

  fn cleanup_order(&self) -> CleanupOrder {
    CleanupOrder::First
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::SystemdUnit(unit) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    if self.is_enabled(&unit.name, unit.user.as_deref())? {
      Ok(Some(enabled()))
    } else {
      Ok(None)
    }
  }

  fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    Ok(Some(enabled()))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut scopes: BTreeMap<Option<String>, Vec<(String, ItemId)>> = BTreeMap::new();
    for item in items {
      let ConfigItem::SystemdUnit(unit) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      if self.state_current(item)? != self.state_target(item, ctx)? {
        scopes
          .entry(unit.user.clone())
          .or_default()
          .push((unit.name.clone(), item.id()));
      }
    }

    let mut actions = Vec::new();
    for (user, units) in scopes {
      let names: Vec<String> = units.iter().map(|(name, _)| name.clone()).collect();
      let ids: Vec<ItemId> = units.iter().map(|(_, id)| id.clone()).collect();
      let modes: Vec<ConfirmMode> = ids.iter().map(|id| ctx.model.confirm_mode_of(id)).collect();
      debug!(units = ?names, user = ?user, "units to enable");

      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let recorded = ids.clone();
      let scope = user.clone();
      let action = Action::new(format!("enable --now {}", names.join(" ")), move || {
        runner.run(&systemctl(scope.as_deref()).arg("daemon-reload"))?;
        runner.run(&systemctl(scope.as_deref()).args(["enable", "--now"]).args(&names))?;
        for (id, mode) in recorded.iter().zip(modes) {
          ledger.record(id, mode)?;
        }
        Ok(())
      })
      .installs(ids);

      actions.push(match scope_info(&user) {
        Some(info) => action.info(info),
        None => action,
      });
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut scopes: BTreeMap<Option<String>, Vec<(ItemId, Option<ConfirmMode>)>> = BTreeMap::new();
    for (id, mode) in self.ledger.orphans(keep)? {
      scopes.entry(id.qualifier.clone()).or_default().push((id, mode));
    }

    let mut actions = Vec::new();
    for (user, units) in scopes {
      let names: Vec<String> = units.iter().map(|(id, _)| id.key.clone()).collect();
      let ids: Vec<ItemId> = units.iter().map(|(id, _)| id.clone()).collect();
      let mode = units.iter().filter_map(|(_, mode)| *mode).max();

      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let forgotten = ids.clone();
      let scope = user.clone();
      let action = Action::new(format!("disable --now {}", names.join(" ")), move || {
        runner.run(&systemctl(scope.as_deref()).args(["disable", "--now"]).args(&names))?;
        for id in &forgotten {
          ledger.forget(id)?;
        }
        Ok(())
      })
      .removes(ids)
      .destructive()
      .confirm_mode(mode);

      actions.push(match scope_info(&user) {
        Some(info) => action.info(info),
        None => action,
      });
    }
    Ok(actions)
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(self.ledger.sync(&ctx.declared(self.managed_kinds()), ctx)?)
  }
}
