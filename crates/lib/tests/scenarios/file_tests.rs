//! Files: writing, converging, changing and cleaning up.

use std::fs;

use koti_lib::confirm::RecordingConfirm;
use koti_lib::item::File;
use koti_lib::section::Section;

use super::common::{TestEnv, me};

fn motd(env: &TestEnv, content: &str) -> Vec<Section> {
  vec![Section::new("base").item(File::new(env.path("etc/motd")).content(content).owner(me()))]
}

#[test]
fn single_file_is_written_then_converged() {
  let env = TestEnv::new();
  let path = env.path("etc/motd");

  assert_eq!(env.planned(motd(&env, "hi\n")), [format!("write {}", path.display())]);
  let report = env.apply(motd(&env, "hi\n"));
  assert_eq!(report.executed.len(), 1);
  assert_eq!(fs::read_to_string(&path).unwrap(), "hi\n");

  let (again, _) = env.plan(motd(&env, "hi\n"));
  assert!(again.is_empty());
}

#[test]
fn planning_leaves_no_trace() {
  let env = TestEnv::new();
  let (plan, summary) = env.plan(motd(&env, "hi\n"));
  assert!(!plan.is_empty());
  assert_eq!(summary.actions.len(), 1);

  assert!(!env.path("etc/motd").exists());
  assert!(!env.cache_dir().join("FileManager.json").exists());
}

#[test]
fn content_change_prompts_when_cautious() {
  let env = TestEnv::new();
  env.apply(motd(&env, "one\n"));

  let mut confirm = RecordingConfirm::default();
  env.apply_with(motd(&env, "two\n"), &mut confirm);
  assert_eq!(
    confirm.prompts,
    [format!("write {} (content)", env.path("etc/motd").display())]
  );
  assert_eq!(fs::read_to_string(env.path("etc/motd")).unwrap(), "two\n");
}

#[test]
fn undeclared_file_is_removed() {
  let env = TestEnv::new();
  env.apply(motd(&env, "hi\n"));

  let mut confirm = RecordingConfirm::default();
  let report = env.apply_with(Vec::new(), &mut confirm);
  assert_eq!(report.executed.len(), 1);
  assert!(!env.path("etc/motd").exists());
  assert_eq!(
    confirm.prompts,
    [format!("remove {} [cleanup]", env.path("etc/motd").display())]
  );

  let (again, _) = env.plan(Vec::new());
  assert!(again.is_empty());
}
