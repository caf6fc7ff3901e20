//! Supplementary group memberships.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::Ledger;
use crate::action::Action;
use crate::confirm::ConfirmMode;
use crate::item::{ConfigItem, ItemId, ItemKind};
use crate::manager::{Context, Manager, ManagerError};
use crate::shell::{Cmd, CommandRunner};
use crate::state::ItemState;

pub struct GroupManager {
  ledger: Ledger,
  runner: Rc<dyn CommandRunner>,
}

impl GroupManager {
  pub fn new(ledger: Ledger, runner: Rc<dyn CommandRunner>) -> Self {
    Self { ledger, runner }
  }

  /// Groups `user` is a member of; empty if the user does not exist.
  fn groups(&self, user: &str) -> Result<Vec<String>, ManagerError> {
    let output = self.runner.capture(&Cmd::new("id").args(["-nG", user]))?;
    if !output.success {
      return Ok(Vec::new());
    }
    Ok(output.stdout.split_whitespace().map(str::to_string).collect())
  }
}

fn member() -> ItemState {
  ItemState::from_bytes(b"member")
}

impl Manager for GroupManager {
  fn name(&self) -> &str {
    "GroupManager"
  }

  fn managed_kinds(&self) -> &[ItemKind] {
    &[ItemKind::GroupAssignment]
  }

  fn state_current(&self, item: &ConfigItem) -> Result<Option<ItemState>, ManagerError> {
    let ConfigItem::GroupAssignment(assignment) = item else {
      return Err(ManagerError::wrong_item(self.name(), item));
    };
    let groups = self.groups(&assignment.username)?;
    Ok(groups.contains(&assignment.group).then(member))
  }

  fn state_target(&self, _item: &ConfigItem, _ctx: &Context<'_>) -> Result<Option<ItemState>, ManagerError> {
    Ok(Some(member()))
  }

  fn plan_install(&self, items: &[&ConfigItem], ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut missing: BTreeMap<String, Vec<(String, ItemId)>> = BTreeMap::new();
    for item in items {
      let ConfigItem::GroupAssignment(assignment) = item else {
        return Err(ManagerError::wrong_item(self.name(), item));
      };
      if self.state_current(item)?.is_none() {
        missing
          .entry(assignment.username.clone())
          .or_default()
          .push((assignment.group.clone(), item.id()));
      }
    }

    Ok(
      missing
        .into_iter()
        .map(|(user, groups)| {
          let names: Vec<String> = groups.iter().map(|(g, _)| g.clone()).collect();
          let ids: Vec<ItemId> = groups.into_iter().map(|(_, id)| id).collect();
          let modes: Vec<ConfirmMode> = ids.iter().map(|id| ctx.model.confirm_mode_of(id)).collect();
          let runner = self.runner.clone();
          let ledger = self.ledger.clone();
          let recorded = ids.clone();
          let cmd = Cmd::new("usermod").arg("-aG").arg(names.join(",")).arg(&user);
          Action::new(format!("add {} to {}", user, names.join(" ")), move || {
            runner.run(&cmd)?;
            for (id, mode) in recorded.iter().zip(modes) {
              ledger.record(id, mode)?;
            }
            Ok(())
          })
          .installs(ids)
        })
        .collect(),
    )
  }

  fn plan_cleanup(&self, keep: &[&ConfigItem], _ctx: &Context<'_>) -> Result<Vec<Action>, ManagerError> {
    let mut actions = Vec::new();
    for (id, mode) in self.ledger.orphans(keep)? {
      let Some(group) = id.qualifier.clone() else {
        continue;
      };
      let user = id.key.clone();
      if !self.groups(&user)?.contains(&group) {
        continue;
      }
      let runner = self.runner.clone();
      let ledger = self.ledger.clone();
      let forgotten = id.clone();
      actions.push(
        Action::new(format!("remove {} from {}", user, group), move || {
          runner.run(&Cmd::new("gpasswd").args(["-d", user.as_str(), group.as_str()]))?;
          ledger.forget(&forgotten)?;
          Ok(())
        })
        .removes([id])
        .confirm_mode(mode),
      );
    }
    Ok(actions)
  }

  fn finalize(&self, ctx: &Context<'_>) -> Result<(), ManagerError> {
    let declared = ctx.declared(self.managed_kinds());
    if !ctx.dryrun {
      // Memberships removed outside of this tool.
      for (id, _) in self.ledger.orphans(&declared)? {
        if let Some(group) = &id.qualifier
          && !self.groups(&id.key)?.contains(group)
        {
          self.ledger.forget(&id)?;
        }
      }
    }
    Ok(self.ledger.sync(&declared, ctx)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::GroupAssignment;
  use crate::managers::testutil::{Fixture, actions, descriptions, run_all};
  use crate::section::Section;
  use crate::shell::CommandOutput;

  fn manager(fixture: &Fixture) -> GroupManager {
    GroupManager::new(fixture.ledger("GroupManager"), fixture.runner.clone())
  }

  #[test]
  fn adds_missing_memberships_per_user() {
    let fixture = Fixture::new();
    fixture.runner.respond("id -nG alice", CommandOutput::ok("alice wheel\n"));
    let model = fixture.model(
      manager(&fixture),
      vec![Section::new("a")
        .item(GroupAssignment::new("alice", "wheel"))
        .item(GroupAssignment::new("alice", "docker"))
        .item(GroupAssignment::new("alice", "video"))
        .item(GroupAssignment::new("bob", "audio"))],
    );

    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(descriptions(&planned), ["add alice to docker video", "add bob to audio"]);
    run_all(planned);
    assert_eq!(
      fixture.runner.executed(),
      ["usermod -aG docker,video alice", "usermod -aG audio bob"]
    );
  }

  #[test]
  fn removes_dropped_memberships() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger("GroupManager");
    ledger
      .record(&ItemId::group_assignment("alice", "docker"), ConfirmMode::Cautious)
      .unwrap();
    fixture.runner.respond("id -nG alice", CommandOutput::ok("alice docker\n"));

    let model = fixture.model(manager(&fixture), Vec::new());
    let planned = actions(&model, &fixture.ctx(&model, false));
    assert_eq!(descriptions(&planned), ["remove alice from docker"]);
    assert!(planned[0].is_destructive());
    run_all(planned);
    assert_eq!(fixture.runner.executed(), ["gpasswd -d alice docker"]);
    assert!(fixture.ledger("GroupManager").installed().unwrap().is_empty());
  }
}
