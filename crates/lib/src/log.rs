//! Operator-facing message buffer.
//!
//! Managers report non-fatal diagnostics here while planning and applying.
//! Messages are forwarded to `tracing` immediately and kept in a buffer that
//! the front end prints, deduplicated, at the end of the plan and apply phases.

use std::cell::RefCell;
use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
  Info,
  Warn,
  Error,
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Level::Info => "info",
      Level::Warn => "warn",
      Level::Error => "error",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogMessage {
  pub level: Level,
  pub text: String,
}

#[derive(Debug, Default)]
pub struct Logger {
  messages: RefCell<Vec<LogMessage>>,
}

impl Logger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn info(&self, text: impl Into<String>) {
    let text = text.into();
    info!(message = %text, "logged");
    self.push(Level::Info, text);
  }

  pub fn warn(&self, text: impl Into<String>) {
    let text = text.into();
    warn!(message = %text, "logged");
    self.push(Level::Warn, text);
  }

  pub fn error(&self, text: impl Into<String>) {
    let text = text.into();
    error!(message = %text, "logged");
    self.push(Level::Error, text);
  }

  fn push(&self, level: Level, text: String) {
    self.messages.borrow_mut().push(LogMessage { level, text });
  }

  /// Buffered messages with duplicates removed, in first-seen order.
  pub fn messages(&self) -> Vec<LogMessage> {
    let mut seen = Vec::new();
    for message in self.messages.borrow().iter() {
      if !seen.contains(message) {
        seen.push(message.clone());
      }
    }
    seen
  }

  /// Return the deduplicated messages and empty the buffer.
  pub fn drain(&self) -> Vec<LogMessage> {
    let messages = self.messages();
    self.messages.borrow_mut().clear();
    messages
  }

  pub fn is_empty(&self) -> bool {
    self.messages.borrow().is_empty()
  }
}
