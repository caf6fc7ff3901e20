//! Cross-section requirements and contradictory ordering.

use koti_lib::item::{File, ItemExt, ItemId, ItemPredicate, Package};
use koti_lib::planner::PlanError;
use koti_lib::schedule::ScheduleError;
use koti_lib::section::Section;

use super::common::{TestEnv, me};

#[test]
fn required_section_is_installed_first() {
  let env = TestEnv::new();
  let base = env.path("etc/base");
  let app = env.path("etc/app");
  let sections = vec![
    Section::new("app")
      .requires_section("base")
      .item(File::new(&app).content("app").owner(me())),
    Section::new("base").item(File::new(&base).content("base").owner(me())),
  ];

  assert_eq!(
    env.planned(sections),
    [format!("write {}", base.display()), format!("write {}", app.display())]
  );
}

#[test]
fn requiring_an_undeclared_section_fails() {
  let env = TestEnv::new();
  let Err(err) = env.try_plan(vec![Section::new("app").requires_section("nope").item(Package::new("x"))]) else {
    panic!("planning should fail");
  };
  assert!(matches!(
    err,
    PlanError::Schedule(ScheduleError::UnknownSection { ref required, .. }) if required == "nope"
  ));
}

#[test]
fn contradiction_reports_only_the_conflicting_items() {
  let env = TestEnv::new();
  let conf = env.path("etc/y");
  let Err(err) = env.try_plan(vec![Section::new("s")
    .item(Package::new("x").before(ItemPredicate::id(ItemId::file(&conf))))
    .item(File::new(&conf).content("y").before(ItemPredicate::id(ItemId::package("x"))))
    .item(Package::new("z"))]) else {
    panic!("planning should fail");
  };

  let PlanError::Schedule(ScheduleError::Infeasible { items, constraints }) = err else {
    panic!("expected an infeasible schedule");
  };
  assert_eq!(items.len(), 2);
  assert!(items.contains(&ItemId::package("x")));
  assert!(items.contains(&ItemId::file(&conf)));
  assert!(!constraints.is_empty());
}
