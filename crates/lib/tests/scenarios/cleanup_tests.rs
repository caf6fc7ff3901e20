//! Cleanup of items that are no longer declared.

use koti_lib::confirm::{ConfirmMode, RecordingConfirm};
use koti_lib::item::{ItemExt, SystemdUnit};
use koti_lib::section::Section;
use koti_lib::shell::CommandOutput;

use super::common::TestEnv;

#[test]
fn disabling_a_unit_uses_its_remembered_mode() {
  let env = TestEnv::with_default(ConfirmMode::Yolo);
  let sections = vec![Section::new("net").item(SystemdUnit::new("sshd").confirm_mode(ConfirmMode::Paranoid))];

  let mut confirm = RecordingConfirm::default();
  env.apply_with(sections, &mut confirm);
  assert_eq!(confirm.prompts, ["enable --now sshd"]);
  env
    .runner
    .respond("systemctl is-enabled sshd", CommandOutput::ok("enabled\n"));

  let mut confirm = RecordingConfirm::default();
  env.apply_with(Vec::new(), &mut confirm);
  assert_eq!(confirm.prompts, ["disable --now sshd [cleanup]"]);
  assert_eq!(
    env.runner.executed().last().map(String::as_str),
    Some("systemctl disable --now sshd")
  );

  let (again, _) = env.plan(Vec::new());
  assert!(again.is_empty());
}

#[test]
fn yolo_never_prompts_for_unremembered_items() {
  let env = TestEnv::with_default(ConfirmMode::Yolo);
  let mut confirm = RecordingConfirm::default();
  env.apply_with(vec![Section::new("net").item(SystemdUnit::new("sshd"))], &mut confirm);
  let report = env.apply_with(Vec::new(), &mut confirm);
  assert_eq!(report.executed.len(), 1);
  assert!(confirm.prompts.is_empty());
}
