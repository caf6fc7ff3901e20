//! Swap files.
//!
//! A swapfile whose size differs from the declaration is recreated, which
//! takes it offline for a moment; that counts as destructive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;

use super::Ledger;
use crate::action::{Action, ActionError};
use crate::item::{ConfigItem, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::{Cmd, CommandError, CommandRunner};
use crate::state::ItemState;

#[derive(Serialize)]
struct SwapState {
  exists: bool,
  size: u64,
}

fn swap_state(item: &ConfigItem, size: u64) -> Result<Option<ItemState>, ManagerError> {
  let state = ItemState::of(&SwapState { exists: true, size }).map_err(|source| ManagerError::State {
    id: item.id(),
    source,
  })?;
  Ok(Some(state))
}

fn size_of(path: &Path) -> Result<Option<u64>, ManagerError> {
  match fs::metadata(path) {
    Ok(meta) => Ok(Some(meta.len())),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(ManagerError::io(format!("failed to stat {}", path.display()), e)),
  }
}

/// Whether `path` is an active swap area.
fn active(runner: &dyn CommandRunner, path: &Path) -> Result<bool, CommandError> {
  let output = runner.capture(&Cmd::new("swapon").args(["--show=NAME", "--noheadings"]))?;
  let name = path.display().to_string();
  Ok(output.success && output.lines().any(|line| line == name))
}

fn swapoff(runner: &dyn CommandRunner, path: &Path) -> Result<(), ActionError> {
  if active(runner, path)? {
    runner.run(&Cmd::new("swapoff").arg(path.display().to_string()))?;
  }
  Ok(())
}

fn remove(path: &Path) -> Result<(), ActionError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(ActionError::io(format!("failed to remove {}", path.display()), e)),
  }
}

fn create(runner: &dyn CommandRunner, path: &Path, size: u64) -> Result<(), ActionError> {
  let name = path.display().to_string();
  runner.run(
    &Cmd::new("dd")
      .args(["if=/dev/zero", "bs=1M", "iflag=count_bytes"])
      .arg(format!("of={}", name))
      .arg(format!("count={}", size)),
  )?;
  runner.run(&Cmd::new("chmod").arg("600").arg(&name))?;
  runner.run(&Cmd::new("mkswap").arg(&name))?;
  runner.run(&Cmd::new("swapon").arg(&name))?;
  Ok(())
}

pub struct SwapfileManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl SwapfileManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }
}

impl Manager for SwapfileManager {
  fn name(&self) -> &str {
    "SwapfileManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::Swapfile]
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::Swapfile(swap) if !swap.path.is_absolute() => {
        Err(ManagerError::invalid(item.id(), "path must be absolute"))
      }
      ConfigItem::Swapfile(swap) if swap.size_bytes == 0 => Err(ManagerError::invalid(item.id(), "size is zero")),
      ConfigItem::Swapfile(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::Swapfile(swap) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    match size_of(&swap.path)? {
      Some(size) => swap_state(item, size),
      None => Ok(None),
    }
  }

  fn state_target(&self, item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::Swapfile(swap) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    swap_state(item, swap.size_bytes)
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for item in items {
      let ConfigItem::Swapfile(swap) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      let current = size_of(&swap.path)?;
      if current == Some(swap.size_bytes) {
        continue;
      }

      let id = item.id();
      let mode = ctx.model.confirm_mode_of(&id);
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let recorded = id.clone();
      let (path, size): (PathBuf, u64) = (swap.path.clone(), swap.size_bytes);

      let action = match current {
        None => Action::new(format!("create swapfile {}", path.display()), move || {
          create(runner.as_ref(), &path, size)?;
          ledger.record(&recorded, mode)?;
          Ok(())
        })
        .installs([id])
        .info(format!("{} bytes", size)),
        Some(old) => Action::new(format!("resize swapfile {}", path.display()), move || {
          swapoff(runner.as_ref(), &path)?;
          remove(&path)?;
          create(runner.as_ref(), &path, size)?;
          ledger.record(&recorded, mode)?;
          Ok(())
        })
        .updates([id])
        .info(format!("{} -> {} bytes", old, size))
        .destructive(),
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
        .map(|(id, mode)| {
          let runner = self.runner.clone();
          let ledger = self.ledger.clone();
          let forgotten = id.clone();
          let path = PathBuf::from(&id.key);
          Action::new(format!("remove swapfile {}", id.key), move || {
            swapoff(runner.as_ref(), &path)?;
            remove(&path)?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
          .removes([id])
          .confirm_mode(mode)
        })
        .collect(),
    )
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(self.ledger.sync(&ctx.declared(self.managed_kinds()), ctx)?)
  }
}
