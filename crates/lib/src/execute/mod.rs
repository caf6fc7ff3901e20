//! Applying a plan.
//!
//! The executor re-runs the planning walk with the dry run flag cleared and
//! executes every action as soon as its manager emits it, so later steps see
//! the effects of earlier ones. Each action is gated by the confirm policy:
//! - an action the plan did not expect always prompts
//! - otherwise the strictest applicable [`ConfirmMode`] decides, based on
//!   whether the action is destructive
//!
//! A refusal aborts the run. Actions executed before a failure or refusal
//! stay applied.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionError, ActionKey};
use crate::confirm::{Confirm, ConfirmMode};
use crate::log::Logger;
use crate::model::Model;
use crate::planner::{ExecutionPlan, Phase, PlanError, walk};

#[derive(Debug, Error)]
pub enum ApplyError {
  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("action '{description}' failed: {source}")]
  Action {
    description: String,
    #[source]
    source: ActionError,
  },

  #[error("failed to read confirmation: {0}")]
  Prompt(#[source] io::Error),

  #[error("cancelled at '{description}'")]
  Cancelled { description: String },

  #[error("interrupted")]
  Interrupted,
}

impl ApplyError {
  /// Whether the run stopped because the operator asked it to.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, ApplyError::Cancelled { .. } | ApplyError::Interrupted)
  }
}

/// Options for the apply operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  /// Pause after each executed action.
  pub pacing: Duration,

  /// Checked before each action; set by the front end on Ctrl-C.
  pub interrupt: Option<Arc<AtomicBool>>,
}

/// Result of an apply.
#[derive(Debug, Default)]
pub struct ApplyReport {
  /// Keys of executed actions, in execution order.
  pub executed: Vec<ActionKey>,

  /// Actions that were not part of the plan.
  pub unexpected: usize,

  /// Planned actions that reality no longer required.
  pub skipped: usize,
}

/// Execute `plan`, asking `confirm` wherever the policy requires.
pub fn apply(
  plan: &ExecutionPlan,
  confirm: &mut dyn Confirm,
  log: &Logger,
  options: &ApplyOptions,
) -> Result<ApplyReport, ApplyError> {
  info!(expected = plan.expected_actions.len(), "starting apply");

  let mut expected: BTreeMap<ActionKey, usize> = BTreeMap::new();
  for key in &plan.expected_actions {
    *expected.entry(key.clone()).or_default() += 1;
  }

  let mut report = ApplyReport::default();
  let model = &plan.model;

  walk(model, false, log, |phase, action| {
    if options
      .interrupt
      .as_ref()
      .is_some_and(|flag| flag.load(Ordering::SeqCst))
    {
      return Err(ApplyError::Interrupted);
    }

    let key = action.key();
    let planned = match expected.get_mut(&key) {
      Some(count) if *count > 0 => {
        *count -= 1;
        true
      }
      _ => false,
    };

    let prompt = if planned {
      let mode = effective_mode(model, &action);
      mode
        .requires_confirmation(action.is_destructive())
        .then(|| describe(&action, phase, None))
    } else {
      warn!(action = %action.description, "action was not in the plan");
      report.unexpected += 1;
      Some(describe(&action, phase, Some("not in the plan")))
    };

    if let Some(prompt) = prompt
      && !confirm.confirm(&prompt).map_err(ApplyError::Prompt)?
    {
      return Err(ApplyError::Cancelled {
        description: action.description.clone(),
      });
    }

    debug!(action = %action.description, ?phase, "executing");
    let description = action.description.clone();
    action
      .run()
      .map_err(|source| ApplyError::Action { description, source })?;
    report.executed.push(key);

    if !options.pacing.is_zero() {
      thread::sleep(options.pacing);
    }
    Ok(())
  })?;

  report.skipped = expected.values().sum();
  info!(
    executed = report.executed.len(),
    unexpected = report.unexpected,
    skipped = report.skipped,
    "apply complete"
  );
  Ok(report)
}

/// Strictest of the action's own mode, the modes of the declared items it
/// touches and the default.
fn effective_mode(model: &Model, action: &Action) -> ConfirmMode {
  let items = action
    .changes()
    .filter(|(id, _)| model.contains(id))
    .map(|(id, _)| model.confirm_mode_of(id));
  ConfirmMode::strictest(model.default_confirm_mode(), action.confirm_mode.into_iter().chain(items))
}

fn describe(action: &Action, phase: Phase, note: Option<&str>) -> String {
  let mut text = action.description.clone();
  if let Some(info) = &action.additional_info {
    text.push_str(&format!(" ({})", info));
  }
  if phase == Phase::Cleanup {
    text.push_str(" [cleanup]");
  }
  if let Some(note) = note {
    text.push_str(&format!(" [{}]", note));
  }
  text
}
