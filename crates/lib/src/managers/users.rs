//! Local user accounts, their login shells and home directories.
//!
//! Removing a `User` from the configuration deletes the account but keeps
//! its home directory. Dropping a `UserShell` or `UserHome` leaves the
//! account as it is.

use std::path::PathBuf;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use super::Ledger;
use crate::action::Action;
use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

/// A `passwd` entry, as far as this manager cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
  pub name: String,
  pub home: PathBuf,
  pub shell: String,
}

impl Account {
  /// Parse one line of `getent passwd`.
  pub fn parse(line: &str) -> Option<Self> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
      return None;
    }
    Some(Self {
      name: fields[0].to_string(),
      home: PathBuf::from(fields[5]),
      shell: fields[6].to_string(),
    })
  }
}

#[derive(Serialize)]
struct AccountState<'a> {
  exists: bool,
  shell: Option<&'a str>,
  home: Option<&'a PathBuf>,
}

fn state(item: &ConfigItem, shell: Option<&str>, home: Option<&PathBuf>) -> Result<Option<ItemState>, ManagerError> {
  let state = ItemState::of(&AccountState {
    exists: true,
    shell,
    home,
  })
  .map_err(|source| ManagerError::State { id: item.id(), source })?;
  Ok(Some(state))
}

pub struct UserManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl UserManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  fn account(&self, name: &str) -> Result<Option<Account>, ManagerError> {
    let output = self.runner.capture(&Cmd::new("getent").args(["passwd", name]))?;
    if !output.success {
      return Ok(None);
    }
    Ok(output.lines().next().and_then(Account::parse))
  }

  fn action(&self, description: String, cmd: Cmd, id: ItemId, ctx: &Context<'_>) -> Action {
    let mode = ctx.model.confirm_mode_of(&id);
    let runner = self.runner.clone();
    let ledger = self.ledger.clone();
    let recorded = id.clone();
    Action::new(description, move || {
      runner.run(&cmd)?;
      ledger.record(&recorded, mode)?;
      Ok(())
    })
  }
}

impl Manager for UserManager {
  fn name(&self) -> &str {
    "UserManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::User, ItemKind::UserShell, ItemKind::UserHome]
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::UserHome(home) if !home.homedir.is_absolute() => {
        Err(ManagerError::invalid(item.id(), "home directory must be absolute"))
      }
      ConfigItem::User(user) if user.home.as_ref().is_some_and(|h| !h.is_absolute()) => {
        Err(ManagerError::invalid(item.id(), "home directory must be absolute"))
      }
      ConfigItem::User(_) | ConfigItem::UserShell(_) | ConfigItem::UserHome(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let (name, current) = match item {
      ConfigItem::User(user) => (&user.username, None),
      ConfigItem::UserShell(shell) => (&shell.username, Some(ItemKind::UserShell)),
      ConfigItem::UserHome(home) => (&home.username, Some(ItemKind::UserHome)),
      _ => return Err(ManagerError::wrong_item(self.name(), item)),
    };
    let Some(account) = self.account(name)? else {
      return Ok(None);
    };
    match current {
      None => state(item, None, None),
      Some(ItemKind::UserShell) => state(item, Some(&account.shell), None),
      Some(_) => state(item, None, Some(&account.home)),
    }
  }

  fn state_target(&self, item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    match item {
      ConfigItem::User(_) => state(item, None, None),
      ConfigItem::UserShell(shell) => state(item, Some(&shell.shell), None),
      ConfigItem::UserHome(home) => state(item, None, Some(&home.homedir)),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for item in items {
      let current = self.state_current(item)?;
      if current == self.state_target(item, ctx)? {
        continue;
      }
      let id = item.id();
      debug!(item = %id, "account out of date");

      let action = match item {
        ConfigItem::User(user) => {
          let mut cmd = Cmd::new("useradd").arg("-m");
          if let Some(shell) = &user.shell {
            cmd = cmd.args(["-s", shell.as_str()]);
          }
          if let Some(home) = &user.home {
            cmd = cmd.arg("-d").arg(home.display().to_string());
          }
          let cmd = cmd.arg(&user.username);
          self
            .action(format!("create user {}", user.username), cmd, id.clone(), ctx)
            .installs([id])
        }
        ConfigItem::UserShell(shell) => {
          let cmd = Cmd::new("usermod").args(["-s", shell.shell.as_str(), shell.username.as_str()]);
          let action = self.action(
            format!("set login shell of {} to {}", shell.username, shell.shell),
            cmd,
            id.clone(),
            ctx,
          );
          if current.is_some() { action.updates([id]) } else { action.installs([id]) }
        }
        ConfigItem::UserHome(home) => {
          let cmd = Cmd::new("usermod")
            .arg("-d")
            .arg(home.homedir.display().to_string())
            .args(["-m", home.username.as_str()]);
          let action = self.action(
            format!("move home of {} to {}", home.username, home.homedir.display()),
            cmd,
            id.clone(),
            ctx,
          );
          if current.is_some() {
            action.updates([id]).destructive()
          } else {
            action.installs([id])
          }
        }
        _ => return Err(ManagerError::wrong_item(self.name(), item)),
      };
      actions.push(action);
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    Ok(
      self
        .ledger
        .orphans(keep)?
        .into_iter()
        .filter(|(id, _)| id.kind == ItemKind::User)
        .map(|(id, mode)| {
          let runner = self.runner.clone();
          let ledger = self.ledger.clone();
          let forgotten = id.clone();
          Action::new(format!("delete user {}", id.key), move || {
            runner.run(&Cmd::new("userdel").arg(forgotten.key.as_str()))?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
          .info("home directory is kept")
          .removes([id])
          .confirm_mode(mode)
        })
        .collect(),
    )
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    let declared = ctx.declared(self.managed_kinds());
    if !ctx.dryrun {
      for (id, _) in self.ledger.orphans(&declared)? {
        if id.kind != ItemKind::User {
          self.ledger.forget(&id)?;
        }
      }
    }
    Ok(self.ledger.sync(&declared, ctx)?)
  }
}
