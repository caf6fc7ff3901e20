//! Implementation of the `apply` command.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use koti_lib::confirm::{Confirm, ConfirmMode};
use koti_lib::execute::{ApplyOptions, apply};
use koti_lib::log::Logger;
use koti_lib::model::Model;

use super::plan::{compute, interrupted, print_plan};
use crate::cli::GlobalOptions;
use crate::interrupt::Interrupt;
use crate::output::{format_duration, print_messages, print_success, print_warning};

/// How a command ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Done,
  Cancelled,
}

/// Plan, ask once for the whole plan, then execute it.
///
/// Individual actions are still confirmed according to their confirm mode.
/// With a `yolo` default the up-front question is skipped as well.
pub fn cmd_apply(
  model: Model,
  options: &GlobalOptions,
  confirm: &mut dyn Confirm,
  pacing: Duration,
  interrupt: &Interrupt,
) -> Result<Outcome> {
  let log = Logger::new();
  let (plan, summary) = compute(model, &log)?;
  if interrupted(interrupt) {
    return Ok(Outcome::Cancelled);
  }
  print_plan(&summary, options, &log.drain());

  if plan.is_empty() {
    return Ok(Outcome::Done);
  }

  println!();
  if options.confirm_mode != ConfirmMode::Yolo
    && !confirm
      .confirm("Apply these changes?")
      .context("Failed to read confirmation")?
  {
    print_warning("Nothing applied");
    return Ok(Outcome::Cancelled);
  }
  if interrupted(interrupt) {
    return Ok(Outcome::Cancelled);
  }

  let started = Instant::now();
  let apply_options = ApplyOptions {
    pacing,
    interrupt: Some(interrupt.flag()),
  };
  let result = {
    let _deferred = interrupt.defer();
    apply(&plan, confirm, &log, &apply_options)
  };

  let messages = log.drain();
  if !messages.is_empty() {
    println!();
    print_messages(&messages);
  }

  match result {
    Ok(report) => {
      info!(
        executed = report.executed.len(),
        unexpected = report.unexpected,
        skipped = report.skipped,
        "apply finished"
      );
      print_success(&format!(
        "Executed {} action(s) in {}",
        report.executed.len(),
        format_duration(started.elapsed())
      ));
      if report.skipped > 0 {
        print_warning(&format!("{} planned action(s) were no longer needed", report.skipped));
      }
      if interrupted(interrupt) {
        return Ok(Outcome::Cancelled);
      }
      Ok(Outcome::Done)
    }
    Err(err) if err.is_cancellation() => {
      print_warning(&err.to_string());
      Ok(Outcome::Cancelled)
    }
    Err(err) => Err(err).context("Apply failed"),
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use koti_lib::confirm::{AutoConfirm, AutoDecline, RecordingConfirm};
  use koti_lib::item::File;
  use koti_lib::managers::Ledger;
  use koti_lib::managers::file::FileManager;
  use koti_lib::planner::build_model;
  use koti_lib::section::Section;
  use tempfile::TempDir;

  use super::*;
  use crate::cmd::cmd_plan;
  use crate::output::OutputFormat;

  fn raised() -> Interrupt {
    let interrupt = Interrupt::default();
    interrupt.raise();
    interrupt
  }

  fn options(confirm_mode: ConfirmMode) -> GlobalOptions {
    GlobalOptions {
      confirm_mode,
      cache_dir: None,
      no_sections: true,
      no_items: true,
      verbose: false,
    }
  }

  fn model(temp: &TempDir, target: &Path, mode: ConfirmMode) -> Model {
    let ledger = Ledger::open(&temp.path().join("cache"), "FileManager").unwrap();
    build_model(
      vec![Section::new("motd").item(File::new(target).content("hello\n"))],
      vec![Box::new(FileManager::new(ledger))],
      mode,
    )
    .unwrap()
  }

  fn run(model: Model, mode: ConfirmMode, confirm: &mut dyn Confirm) -> Outcome {
    cmd_apply(model, &options(mode), confirm, Duration::ZERO, &Interrupt::default()).unwrap()
  }

  #[test]
  fn test_declining_applies_nothing() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let outcome = run(model(&temp, &target, ConfirmMode::Cautious), ConfirmMode::Cautious, &mut AutoDecline);
    assert_eq!(outcome, Outcome::Cancelled);
    assert!(!target.exists());
  }

  #[test]
  fn test_confirming_applies_the_plan() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let outcome = run(model(&temp, &target, ConfirmMode::Cautious), ConfirmMode::Cautious, &mut AutoConfirm);
    assert_eq!(outcome, Outcome::Done);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello\n");
  }

  #[test]
  fn test_yolo_skips_the_question() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let mut confirm = RecordingConfirm::default();
    let outcome = run(model(&temp, &target, ConfirmMode::Yolo), ConfirmMode::Yolo, &mut confirm);
    assert_eq!(outcome, Outcome::Done);
    assert!(confirm.prompts.is_empty());
    assert!(target.exists());
  }

  #[test]
  fn test_interrupt_cancels() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let mut confirm = RecordingConfirm::default();
    let outcome = cmd_apply(
      model(&temp, &target, ConfirmMode::Cautious),
      &options(ConfirmMode::Cautious),
      &mut confirm,
      Duration::ZERO,
      &raised(),
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Cancelled);
    assert!(confirm.prompts.is_empty());
    assert!(!target.exists());
  }

  #[test]
  fn test_interrupted_plan_is_cancelled() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let plan = |interrupt: &Interrupt| {
      let model = model(&temp, &target, ConfirmMode::Cautious);
      cmd_plan(model, &options(ConfirmMode::Cautious), OutputFormat::Text, interrupt).unwrap()
    };
    assert_eq!(plan(&raised()), Outcome::Cancelled);
    assert_eq!(plan(&Interrupt::default()), Outcome::Done);
  }

  /// Says yes, but Ctrl-C was pressed while the question was open.
  struct InterruptedAnswer(Interrupt);

  impl Confirm for InterruptedAnswer {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
      self.0.raise();
      Ok(true)
    }
  }

  #[test]
  fn test_interrupt_at_the_prompt_applies_nothing() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("motd");
    let interrupt = Interrupt::default();
    let outcome = cmd_apply(
      model(&temp, &target, ConfirmMode::Cautious),
      &options(ConfirmMode::Cautious),
      &mut InterruptedAnswer(interrupt.clone()),
      Duration::ZERO,
      &interrupt,
    )
    .unwrap();
    assert_eq!(outcome, Outcome::Cancelled);
    assert!(!target.exists());
  }
}
