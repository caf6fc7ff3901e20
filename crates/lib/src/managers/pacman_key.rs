//! Keys in the pacman keyring.

use std::rc::Rc;

use super::Ledger;
use crate::action::Action;
use crate::item::{ConfigItem, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::model::Model;
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

pub struct PacmanKeyManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl PacmanKeyManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }
}

fn present() -> ItemState {
  ItemState::from_bytes(b"present")
}

impl Manager for PacmanKeyManager {
  fn name(&self) -> &str {
    "PacmanKeyManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::PacmanKey]
  }

  fn assert_installable(&self, item: &ConfigItem, _model: &Model) -> Result<(), ManagerError> {
    match item {
      ConfigItem::PacmanKey(key) if key.key_server.trim().is_empty() => {
        Err(ManagerError::invalid(item.id(), "key server is empty"))
      }
      ConfigItem::PacmanKey(_) => Ok(()),
      _ => Err(ManagerError::wrong_item(self.name(), item)),
    }
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::PacmanKey(key) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    let output = self
      .runner
      .capture(&Cmd::new("pacman-key").args(["--list-keys", key.key_id.as_str()]))?;
    Ok(output.success.then(present))
  }

  fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    Ok(Some(present()))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for item in items {
      let ConfigItem::PacmanKey(key) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      if self.state_current(item)?.is_some() {
        continue;
      }

      let id = item.id();
      let mode = ctx.model.confirm_mode_of(&id);
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let (key_id, server, recorded) = (key.key_id.clone(), key.key_server.clone(), id.clone());
      let action = Action::new(format!("add pacman key {}", key.key_id), move || {
        runner.run(&Cmd::new("pacman-key").args(["--keyserver", server.as_str(), "--recv-keys", key_id.as_str()]))?;
        runner.run(&Cmd::new("pacman-key").args(["--lsign-key", key_id.as_str()]))?;
        ledger.record(&recorded, mode)?;
        Ok(())
      })
      .installs([id]);

      actions.push(match &key.comment {
        Some(comment) => action.info(comment.clone()),
        None => action,
      });
    }
    Ok(actions)
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    self
      .ledger
      .orphans(keep)?
      .into_iter()
      .map(|(id, mode)| {
        let runner = self.runner.clone();
        let ledger = self.ledger.clone();
        let forgotten = id.clone();
        Ok(
          Action::new(format!("delete pacman key {}", id.key), move || {
            runner.run(&Cmd::new("pacman-key").args(["--delete", forgotten.key.as_str()]))?;
            ledger.forget(&forgotten)?;
            Ok(())
          })
          .removes([id])
          .confirm_mode(mode),
        )
      })
      .collect()
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    Ok(self.ledger.sync(&ctx.declared(self.managed_kinds()), ctx)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::PacmanKey;
  use crate::managers::testutil::{Fixture, actions, descriptions, run_all};
  use crate::section::Section;
  use crate::shell::CommandOutput;

  fn manager(fixture: &Fixture) -> PacmanKeyManager {
    PacmanKeyManager::new(fixture.ledger("PacmanKeyManager"), fixture.runner.clone())
  }

  #[test]
  fn receives_and_signs_missing_keys() {
    let fixture = Fixture::new();
    fixture.runner.respond("pacman-key --list-keys AAAA", CommandOutput::ok("pub ...\n"));
    let model = fixture.model(
      manager(&fixture),
      vec![Section::new("keys")
        .item(PacmanKey::new("AAAA", "hkps://keys.openpgp.org"))
        .item(PacmanKey::new("BBBB", "hkps://keyserver.ubuntu.com").comment("chaotic-aur"))],
    );

    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(descriptions(&planned), ["add pacman key BBBB"]);
    assert_eq!(planned[0].additional_info.as_deref(), Some("chaotic-aur"));
    run_all(planned);
    assert_eq!(
      fixture.runner.executed(),
      [
        "pacman-key --keyserver hkps://keyserver.ubuntu.com --recv-keys BBBB",
        "pacman-key --lsign-key BBBB",
      ]
    );
  }

  #[test]
  fn deletes_keys_no_longer_declared() {
    let fixture = Fixture::new();
    let model = fixture.model(
      manager(&fixture),
      vec![Section::new("keys").item(PacmanKey::new("BBBB", "hkps://k"))],
    );
    run_all(actions(&model, &fixture.ctx(&model, false)));
    fixture.runner.clear();

    let model = fixture.model(manager(&fixture), Vec::new());
    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(descriptions(&planned), ["delete pacman key BBBB"]);
    run_all(planned);
    assert_eq!(fixture.runner.executed(), ["pacman-key --delete BBBB"]);
  }

  #[test]
  fn empty_key_server_is_rejected() {
    let fixture = Fixture::new();
    let m = manager(&fixture);
    let model = fixture.model(manager(&fixture), Vec::new());
    assert!(m.assert_installable(&PacmanKey::new("K", " ").into(), &model).is_err());
  }
}
