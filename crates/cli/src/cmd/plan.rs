//! Implementation of the `plan` command.
//!
//! Dry-runs every manager and prints what applying would change. Nothing on
//! the system or in the cache directory is modified.

use anyhow::{Context, Result};
use serde::Serialize;

use koti_lib::action::ActionKey;
use koti_lib::log::{LogMessage, Logger};
use koti_lib::model::Model;
use koti_lib::planner::{ExecutionPlan, PlanSummary, plan};

use super::Outcome;
use crate::cli::GlobalOptions;
use crate::interrupt::Interrupt;
use crate::output::{
  OutputFormat, print_actions, print_items, print_json, print_messages, print_sections, print_warning,
};

#[derive(Serialize)]
struct PlanOutput<'a> {
  expected_actions: &'a [ActionKey],
  summary: &'a PlanSummary,
  messages: Vec<LogMessage>,
}

pub fn cmd_plan(model: Model, options: &GlobalOptions, format: OutputFormat, interrupt: &Interrupt) -> Result<Outcome> {
  let log = Logger::new();
  let (plan, summary) = compute(model, &log)?;
  if interrupted(interrupt) {
    return Ok(Outcome::Cancelled);
  }

  if format.is_json() {
    print_json(&PlanOutput {
      expected_actions: &plan.expected_actions,
      summary: &summary,
      messages: log.drain(),
    })?;
  } else {
    print_plan(&summary, options, &log.drain());
  }
  Ok(Outcome::Done)
}

/// Warn and report whether Ctrl-C was pressed.
pub(super) fn interrupted(interrupt: &Interrupt) -> bool {
  if interrupt.requested() {
    print_warning("Interrupted");
    return true;
  }
  false
}

pub(super) fn compute(model: Model, log: &Logger) -> Result<(ExecutionPlan, PlanSummary)> {
  plan(model, log).context("Planning failed")
}

pub(super) fn print_plan(summary: &PlanSummary, options: &GlobalOptions, messages: &[LogMessage]) {
  if !options.no_sections {
    print_sections(&summary.sections);
  }
  if !options.no_items {
    print_items(&summary.items);
  }
  if !messages.is_empty() {
    println!();
    print_messages(messages);
  }
  print_actions(&summary.actions);
}
