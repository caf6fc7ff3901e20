//! Post hooks fire once per change of their triggers.

use koti_lib::item::{File, ItemId, PostHook};
use koti_lib::section::Section;
use koti_lib::shell::Cmd;

use super::common::{TestEnv, me};

fn locale(env: &TestEnv, content: Option<&str>) -> Vec<Section> {
  let path = env.path("etc/locale.gen");
  let mut section = Section::new("locale");
  if let Some(content) = content {
    section = section.item(File::new(&path).content(content).owner(me()));
  }
  vec![section.item(PostHook::new("regen").trigger(ItemId::file(&path)).run(Cmd::new("locale-gen")))]
}

fn fired(env: &TestEnv) -> usize {
  env.runner.executed().iter().filter(|cmd| *cmd == "locale-gen").count()
}

#[test]
fn fires_once_per_change() {
  let env = TestEnv::new();

  let planned = env.planned(locale(&env, Some("en_US.UTF-8 UTF-8\n")));
  assert_eq!(planned.last().map(String::as_str), Some("run hook regen"));
  env.apply(locale(&env, Some("en_US.UTF-8 UTF-8\n")));
  assert_eq!(fired(&env), 1);

  let (again, _) = env.plan(locale(&env, Some("en_US.UTF-8 UTF-8\n")));
  assert!(again.is_empty());
  env.apply(locale(&env, Some("en_US.UTF-8 UTF-8\n")));
  assert_eq!(fired(&env), 1);

  env.apply(locale(&env, Some("de_DE.UTF-8 UTF-8\n")));
  assert_eq!(fired(&env), 2);
}

#[test]
fn dropping_a_trigger_fires_one_last_time() {
  let env = TestEnv::new();
  env.apply(locale(&env, Some("C\n")));
  assert_eq!(fired(&env), 1);

  env.apply(locale(&env, None));
  assert_eq!(fired(&env), 2);
  assert!(!env.path("etc/locale.gen").exists());

  env.apply(locale(&env, None));
  assert_eq!(fired(&env), 2);
}
