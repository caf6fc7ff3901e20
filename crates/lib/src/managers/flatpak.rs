//! Flatpak remotes and applications, installed system-wide.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::debug;

use super::Ledger;
use crate::action::Action;
use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

pub struct FlatpakManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

fn present() -> ItemState {
  ItemState::from_bytes(b"present")
}

impl FlatpakManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  fn list(&self, args: &[&str]) -> Result<BTreeSet<String>, ManagerError> {
    let output = self.runner.capture(&Cmd::new("flatpak").args(args.iter().copied()))?;
    if !output.success {
      return Ok(BTreeSet::new());
    }
    Ok(output.lines().map(str::to_string).collect())
  }

  fn remotes(&self) -> Result<BTreeSet<String>, ManagerError> {
    self.list(&["remotes", "--system", "--columns=name"])
  }

  fn apps(&self) -> Result<BTreeSet<String>, ManagerError> {
    self.list(&["list", "--system", "--app", "--columns=application"])
  }

  fn removal(&self, description: String, cmd: Cmd, orphans: Vec<(ItemId, Option<ConfirmMode>)>) -> Action {
    let mode = orphans.iter().filter_map(|(_, mode)| *mode).max();
    let ids: Vec<ItemId> = orphans.into_iter().map(|(id, _)| id).collect();
    let runner = self.runner.clone();
    let ledger = self.ledger.clone();
    let forgotten = ids.clone();
    Action::new(description, move || {
      runner.run(&cmd)?;
      for id in &forgotten {
        ledger.forget(id)?;
      }
      Ok(())
    })
    .removes(ids)
    .confirm_mode(mode)
  }
}

impl Manager for FlatpakManager {
  fn name(&self) -> &str {
    "FlatpakManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::FlatpakRepo, ItemKind::FlatpakPackage]
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::FlatpakRepo(repo) => match (&repo.spec_url, &repo.repo_url) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ManagerError::invalid(item.id(), "exactly one of spec_url and repo_url is required")),
      },
      ConfigItem::FlatpakPackage(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let found = match item {
      ConfigItem::FlatpakRepo(repo) => self.remotes()?.contains(&repo.name),
      ConfigItem::FlatpakPackage(package) => self.apps()?.contains(&package.app_id),
      _ => return Err(ManagerError::wrong_item(self.name(), item)),
    };
    Ok(found.then(present))
  }

  fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    Ok(Some(present()))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let remotes = self.remotes()?;
    let apps = self.apps()?;

    let mut actions = Vec::new();
    let mut missing_apps = Vec::new();
    for item in items {
      match item {
        ConfigItem::FlatpakRepo(repo) if !remotes.contains(&repo.name) => {
          let (location, from) = match (&repo.spec_url, &repo.repo_url) {
            (Some(spec), _) => (spec.clone(), true),
            (None, Some(url)) => (url.clone(), false),
            (None, None) => return Err(ManagerError::invalid(item.id(), "no location")),
          };
          let mut cmd = Cmd::new("flatpak").args(["remote-add", "--system", "--if-not-exists"]);
          if from {
            cmd = cmd.arg("--from");
          }
          let cmd = cmd.arg(&repo.name).arg(&location);

          let id = item.id();
          let mode = ctx.model.confirm_mode_of(&id);
          let runner = self.runner.clone();
          let ledger = self.ledger.clone();
          let recorded = id.clone();
          actions.push(
            Action::new(format!("add flatpak remote {}", repo.name), move || {
              runner.run(&cmd)?;
              ledger.record(&recorded, mode)?;
              Ok(())
            })
            .installs([id])
            .info(location),
          );
        }
        ConfigItem::FlatpakPackage(package) if !apps.contains(&package.app_id) => {
          missing_apps.push((package.app_id.clone(), item.id()));
        }
        ConfigItem::FlatpakRepo(_) | ConfigItem::FlatpakPackage(_) => {}
        _ => return Err(ManagerError::wrong_item(self.name(), item)),
      }
    }

    if !missing_apps.is_empty() {
      let names: Vec<String> = missing_apps.iter().map(|(name, _)| name.clone()).collect();
      let ids: Vec<ItemId> = missing_apps.into_iter().map(|(_, id)| id).collect();
      let modes: Vec<ConfirmMode> = ids.iter().map(|id| ctx.model.confirm_mode_of(id)).collect();
      debug!(apps = ?names, "flatpaks to install");

      let cmd = Cmd::new("flatpak")
        .args(["install", "--system", "--noninteractive"])
        .args(&names);
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let recorded = ids.clone();
      actions.push(
        Action::new(format!("install flatpak {}", names.join(" ")), move || {
          runner.run(&cmd)?;
          for (id, mode) in recorded.iter().zip(modes) {
            ledger.record(id, mode)?;
          }
          Ok(())
        })
        .installs(ids),
      );
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let (apps, remotes): (Vec<_>, Vec<_>) = self
      .ledger
      .orphans(keep)?
      .into_iter()
      .partition(|(id, _)| id.kind == ItemKind::FlatpakPackage);

    let mut actions = Vec::new();
    if !apps.is_empty() {
      let names: Vec<String> = apps.iter().map(|(id, _)| id.key.clone()).collect();
      let cmd = Cmd::new("flatpak")
        .args(["uninstall", "--system", "--noninteractive"])
        .args(&names);
      actions.push(self.removal(format!("uninstall flatpak {}", names.join(" ")), cmd, apps));
    }
    for remote in remotes {
      let name = remote.0.key.clone();
      let cmd = Cmd::new("flatpak").args(["remote-delete", "--system", name.as_str()]);
      actions.push(self.removal(format!("delete flatpak remote {}", name), cmd, vec![remote]));
    }
    Ok(actions)
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(self.ledger.sync(&ctx.declared(self.managed_kinds()), ctx)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::{FlatpakPackage, FlatpakRepo};
  use crate::managers::testutil::{Fixture, actions, descriptions, run_all};
  use crate::section::Section;
  use crate::shell::CommandOutput;

  fn manager(fixture: &Fixture) -> FlatpakManager {
    FlatpakManager::new(fixture.ledger("FlatpakManager"), fixture.runner.clone())
  }

  #[test]
  fn adds_remotes_before_installing_apps() {
    let fixture = Fixture::new();
    fixture.runner.respond(
      "flatpak list --system --app --columns=application",
      CommandOutput::ok("org.gimp.GIMP\n"),
    );
    let model = fixture.model(
      manager(&fixture),
      vec![Section::new("flatpak")
        .item(FlatpakRepo::new("flathub").spec_url("https://dl.flathub.org/repo/flathub.flatpakrepo"))
        .item(FlatpakPackage::new("org.gimp.GIMP"))
        .item(FlatpakPackage::new("org.mozilla.firefox"))],
    );

    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(
      descriptions(&planned),
      ["add flatpak remote flathub", "install flatpak org.mozilla.firefox"]
    );
    run_all(planned);
    assert_eq!(
      fixture.runner.executed(),
      [
        "flatpak remote-add --system --if-not-exists --from flathub https://dl.flathub.org/repo/flathub.flatpakrepo",
        "flatpak install --system --noninteractive org.mozilla.firefox",
      ]
    );
  }

  #[test]
  fn uninstalls_apps_before_deleting_remotes() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger("FlatpakManager");
    ledger.record(&ItemId::flatpak_repo("beta"), ConfirmMode::Cautious).unwrap();
    ledger.record(&ItemId::flatpak_package("org.a.A"), ConfirmMode::Yolo).unwrap();
    ledger.record(&ItemId::flatpak_package("org.b.B"), ConfirmMode::Paranoid).unwrap();

    let model = fixture.model(manager(&fixture), Vec::new());
    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(
      descriptions(&planned),
      ["uninstall flatpak org.a.A org.b.B", "delete flatpak remote beta"]
    );
    assert_eq!(planned[0].confirm_mode, Some(ConfirmMode::Paranoid));
    run_all(planned);
    assert!(fixture.ledger("FlatpakManager").installed().unwrap().is_empty());
  }

  #[test]
  fn repo_needs_exactly_one_location() {
    let fixture = Fixture::new();
    let m = manager(&fixture);
    let model = fixture.model(manager(&fixture), Vec::new());
    assert!(m.assert_installable(&FlatpakRepo::new("x").into(), &model).is_err());
    let both = FlatpakRepo::new("x").spec_url("a").repo_url("b");
    assert!(m.assert_installable(&both.into(), &model).is_err());
  }
}
