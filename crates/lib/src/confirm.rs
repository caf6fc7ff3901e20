//! Confirmation policy.
//!
//! Every about-to-execute action is gated by a [`ConfirmMode`]. The effective
//! mode for an item is the strictest of the item's own mode, the modes of the
//! sections declaring it, and the process-wide default.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How eagerly the operator is asked before an action runs.
///
/// Variants are declared from least to most strict so that `Ord` gives
/// `Yolo < Cautious < Paranoid` and `max` picks the most paranoid mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmMode {
  /// Never prompt.
  Yolo,
  /// Prompt for destructive actions only.
  #[default]
  Cautious,
  /// Prompt for every action.
  Paranoid,
}

impl ConfirmMode {
  pub fn as_str(self) -> &'static str {
    match self {
      ConfirmMode::Yolo => "yolo",
      ConfirmMode::Cautious => "cautious",
      ConfirmMode::Paranoid => "paranoid",
    }
  }

  /// Whether an action with the given destructiveness must be confirmed.
  pub fn requires_confirmation(self, destructive: bool) -> bool {
    match self {
      ConfirmMode::Paranoid => true,
      ConfirmMode::Cautious => destructive,
      ConfirmMode::Yolo => false,
    }
  }

  /// The strictest of all given modes, falling back to `default`.
  pub fn strictest<I>(default: ConfirmMode, modes: I) -> ConfirmMode
  where
    I: IntoIterator<Item = ConfirmMode>,
  {
    modes.into_iter().fold(default, ConfirmMode::max)
  }
}

impl fmt::Display for ConfirmMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Error)]
#[error("unknown confirm mode '{0}' (expected paranoid, cautious or yolo)")]
pub struct ParseConfirmModeError(String);

impl FromStr for ConfirmMode {
  type Err = ParseConfirmModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "yolo" => Ok(ConfirmMode::Yolo),
      "cautious" => Ok(ConfirmMode::Cautious),
      "paranoid" => Ok(ConfirmMode::Paranoid),
      _ => Err(ParseConfirmModeError(s.to_string())),
    }
  }
}

/// Asks the operator to confirm an action.
///
/// The engine does not depend on a terminal; the CLI supplies an interactive
/// implementation and tests supply scripted ones.
pub trait Confirm {
  /// Returns `true` if the operator agreed.
  fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// Always agrees.
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
  fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
    Ok(true)
  }
}

/// Always refuses.
pub struct AutoDecline;

impl Confirm for AutoDecline {
  fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
    Ok(false)
  }
}

/// Agrees to everything and remembers what it was asked.
#[derive(Debug, Default)]
pub struct RecordingConfirm {
  pub prompts: Vec<String>,
}

impl Confirm for RecordingConfirm {
  fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
    self.prompts.push(prompt.to_string());
    Ok(true)
  }
}
