//! Shared helpers for engine scenarios.
//!
//! Every scenario runs the stock managers against a [`RecordingRunner`], so
//! no command is ever spawned. Files are written for real, below a temporary
//! directory and owned by the user running the tests.

use std::path::PathBuf;
use std::rc::Rc;

use koti_lib::confirm::{Confirm, ConfirmMode};
use koti_lib::execute::{ApplyOptions, ApplyReport, apply};
use koti_lib::log::Logger;
use koti_lib::managers;
use koti_lib::planner::{ExecutionPlan, PlanError, PlanSummary, build_model, plan};
use koti_lib::section::Section;
use koti_lib::shell::{CommandRunner, RecordingRunner};
use tempfile::TempDir;

pub use koti_lib::platform::users::current_user as me;

/// Isolated cache directory, scratch space and command recorder.
pub struct TestEnv {
  pub temp: TempDir,
  pub runner: Rc<RecordingRunner>,
  pub default_mode: ConfirmMode,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_default(ConfirmMode::Cautious)
  }

  pub fn with_default(default_mode: ConfirmMode) -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      runner: Rc::new(RecordingRunner::new()),
      default_mode,
    }
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// A path below the scratch root.
  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join("root").join(relative)
  }

  pub fn try_plan(&self, sections: Vec<Section>) -> Result<(ExecutionPlan, PlanSummary), PlanError> {
    let runner: Rc<dyn CommandRunner> = self.runner.clone();
    let managers = managers::defaults(&self.cache_dir(), runner).unwrap();
    let model = build_model(sections, managers, self.default_mode)?;
    plan(model, &Logger::new())
  }

  pub fn plan(&self, sections: Vec<Section>) -> (ExecutionPlan, PlanSummary) {
    self.try_plan(sections).unwrap()
  }

  /// Plan, then apply with `confirm`.
  pub fn apply_with(&self, sections: Vec<Section>, confirm: &mut dyn Confirm) -> ApplyReport {
    let (plan, _) = self.plan(sections);
    apply(&plan, confirm, &Logger::new(), &ApplyOptions::default()).unwrap()
  }

  pub fn apply(&self, sections: Vec<Section>) -> ApplyReport {
    self.apply_with(sections, &mut koti_lib::confirm::AutoConfirm)
  }

  /// Descriptions of the planned actions.
  pub fn planned(&self, sections: Vec<Section>) -> Vec<String> {
    let (_, summary) = self.plan(sections);
    summary.actions.into_iter().map(|a| a.description).collect()
  }
}
