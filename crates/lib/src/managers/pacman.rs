//! Packages installed through pacman.
//!
//! A declared package must be installed and marked explicit. Packages come
//! from the repositories, from a URL (`pacman -U`) or from a script. Cleanup
//! does not uninstall anything directly: explicit packages that are no longer
//! declared are marked as dependencies and then every package nothing needs
//! any more is pruned.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::debug;

use super::Ledger;
use crate::action::Action;
use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemKind, Package};
use crate::manager::{CleanupOrder, Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

/// What pacman reports as installed.
#[derive(Debug, Default)]
struct Installed {
  all: BTreeSet<String>,
  explicit: BTreeSet<String>,
}

impl Installed {
  fn state(&self, name: &str) -> Option<ItemState> {
    if self.explicit.contains(name) {
      Some(ItemState::from_bytes(b"explicit"))
    } else if self.all.contains(name) {
      Some(ItemState::from_bytes(b"dependency"))
    } else {
      None
    }
  }
}

pub struct PackageManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl PackageManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  fn query(&self, flags: &str) -> Result<BTreeSet<String>, ManagerError> {
    let output = self.runner.capture(&Cmd::new("pacman").arg(flags))?;
    if !output.success {
      return Ok(BTreeSet::new());
    }
    Ok(output.lines().map(str::to_string).collect())
  }

  fn installed(&self) -> Result<Installed, ManagerError> {
    Ok(Installed {
      all: self.query("-Qq")?,
      explicit: self.query("-Qqe")?,
    })
  }

  fn in_repository(&self, name: &str) -> Result<bool, ManagerError> {
    Ok(self.runner.capture(&Cmd::new("pacman").args(["-Si", name]))?.success)
  }

  /// One action running `cmd`, recording `ids` once it succeeded.
  ///
  /// The caller labels the action with what it does to `ids`.
  fn batch(&self, description: String, cmd: Cmd, ids: &[ItemId], ctx: &Context<'_>) -> Action {
    let modes: Vec<_> = ids.iter().map(|id| ctx.model.confirm_mode_of(id)).collect();
    let runner = self.runner.clone();
    let ledger = self.ledger.clone();
    let recorded = ids.to_vec();
    Action::new(description, move || {
      runner.run(&cmd)?;
      for (id, mode) in recorded.iter().zip(modes) {
        ledger.record(id, mode)?;
      }
      Ok(())
    })
  }

  /// Strictest mode remembered for any of `names`.
  fn strictest_stored(&self, names: &[String]) -> Result<Option<ConfirmMode>, ManagerError> {
    let mut strictest = None;
    for name in names {
      strictest = strictest.max(self.ledger.mode(&ItemId::package(name))?);
    }
    Ok(strictest)
  }
}

fn names(packages: &[&Package]) -> Vec<String> {
  packages.iter().map(|p| p.name.clone()).collect()
}

fn ids(packages: &[&Package]) -> Vec<ItemId> {
  packages.iter().map(|p| p.id()).collect()
}

impl Manager for PackageManager {
  fn name(&self) -> &str {
    "PackageManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::Package]
  }

  fn cleanup_order(&self) -> CleanupOrder {
    CleanupOrder::Last
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::Package(p) if p.url.is_some() && p.script.is_some() => {
        Err(ManagerError::invalid(item.id(), "a package has either a url or a script, not both"))
      }
      ConfigItem::Package(p) if p.name.trim().is_empty() => Err(ManagerError::invalid(item.id(), "empty name")),
      ConfigItem::Package(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::Package(package) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    Ok(self.installed()?.state(&package.name))
  }

  fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    Ok(Some(ItemState::from_bytes(b"explicit")))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let installed = self.installed()?;

    let mut from_repo = Vec::new();
    let mut from_url = Vec::new();
    let mut from_script = Vec::new();
    let mut promote = Vec::new();
    for item in items {
      let ConfigItem::Package(package) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      if installed.explicit.contains(&package.name) {
        continue;
      }
      if installed.all.contains(&package.name) {
        promote.push(package);
      } else if package.url.is_some() {
        from_url.push(package);
      } else if package.script.is_some() {
        from_script.push(package);
      } else {
        from_repo.push(package);
      }
    }
    debug!(
      repo = from_repo.len(),
      url = from_url.len(),
      script = from_script.len(),
      promote = promote.len(),
      "package plan"
    );

    let mut actions = Vec::new();

    for package in &from_url {
      let url = package.url.clone().unwrap_or_default();
      if self.in_repository(&package.name)? {
        ctx.log.warn(format!(
          "{} is installed from {} but is also available in a repository",
          package.name, url
        ));
      }
      let cmd = Cmd::new("pacman").args(["-U", "--needed", "--asexplicit", "--noconfirm"]).arg(&url);
      let id = [package.id()];
      actions.push(
        self
          .batch(format!("install {}", package.name), cmd, &id, ctx)
          .installs(id)
          .info(url),
      );
    }

    for package in &from_script {
      let cmd = Cmd::shell(package.script.clone().unwrap_or_default());
      let id = [package.id()];
      actions.push(
        self
          .batch(format!("install {}", package.name), cmd, &id, ctx)
          .installs(id)
          .info("script"),
      );
    }

    if !from_repo.is_empty() {
      let cmd = Cmd::new("pacman")
        .args(["-S", "--needed", "--asexplicit", "--noconfirm"])
        .args(names(&from_repo));
      let repo_ids = ids(&from_repo);
      actions.push(
        self
          .batch(format!("install {}", names(&from_repo).join(" ")), cmd, &repo_ids, ctx)
          .installs(repo_ids),
      );
    }

    if !promote.is_empty() {
      let cmd = Cmd::new("pacman").args(["-D", "--asexplicit"]).args(names(&promote));
      let promoted = ids(&promote);
      actions.push(
        self
          .batch(format!("mark {} as explicit", names(&promote).join(" ")), cmd, &promoted, ctx)
          .updates(promoted),
      );
    }

    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let declared: BTreeSet<String> = keep
      .iter()
      .filter_map(|item| match item {
        ConfigItem::Package(p) => Some(p.name.clone()),
        _ => None,
      })
      .collect();
    let demote: Vec<String> = self
      .query("-Qqe")?
      .into_iter()
      .filter(|name| !declared.contains(name))
      .collect();
    let unneeded: Vec<String> = self.query("-Qqdt")?.into_iter().collect();

    let mut actions = Vec::new();

    if !demote.is_empty() {
      let ids: Vec<ItemId> = demote.iter().map(ItemId::package).collect();
      let mode = self.strictest_stored(&demote)?;
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let cmd = Cmd::new("pacman").args(["-D", "--asdeps"]).args(&demote);
      let forgotten = ids.clone();
      actions.push(
        Action::new(format!("mark {} as dependencies", demote.join(" ")), move || {
          runner.run(&cmd)?;
          for id in &forgotten {
            ledger.forget(id)?;
          }
          Ok(())
        })
        .removes(ids)
        .confirm_mode(mode),
      );
    }

    if !demote.is_empty() || !unneeded.is_empty() {
      // The packages removed are only known once the demotion ran.
      let candidates: Vec<String> = demote.iter().chain(&unneeded).cloned().collect();
      let mode = self.strictest_stored(&candidates)?;
      let runner = self.runner.clone();
      actions.push(
        Action::new("prune unneeded packages", move || {
          let output = runner.capture(&Cmd::new("pacman").arg("-Qqdt"))?;
          let orphans: Vec<&str> = if output.success { output.lines().collect() } else { Vec::new() };
          if !orphans.is_empty() {
            runner.run(&Cmd::new("pacman").args(["-Rns", "--noconfirm"]).args(orphans))?;
          }
          Ok(())
        })
        .removes(unneeded.iter().map(ItemId::package))
        .destructive()
        .confirm_mode(mode),
      );
    }

    Ok(actions)
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(self.ledger.sync(&ctx.declared(self.managed_kinds()), ctx)?)
  }
}
