//! Ctrl-C handling.
//!
//! Outside of execution an interrupt ends the process at once with exit
//! status 130. While actions execute it only raises a flag, which the
//! executor checks between actions so that no action is cut in half.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::output::print_warning;

/// Exit status after the operator cancelled.
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Clone, Default)]
pub struct Interrupt {
  requested: Arc<AtomicBool>,
  deferred: Arc<AtomicBool>,
}

impl Interrupt {
  /// Install the process-wide Ctrl-C handler.
  pub fn install() -> Result<Self> {
    let interrupt = Self::default();
    let handler = interrupt.clone();
    ctrlc::set_handler(move || {
      if handler.signal() {
        print_warning("Interrupted");
        std::process::exit(i32::from(EXIT_CANCELLED));
      }
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(interrupt)
  }

  /// Record an interrupt. Returns true when the process should exit now.
  fn signal(&self) -> bool {
    self.requested.store(true, Ordering::SeqCst);
    !self.deferred.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> bool {
    self.requested.load(Ordering::SeqCst)
  }

  /// The flag the executor polls between actions.
  pub fn flag(&self) -> Arc<AtomicBool> {
    self.requested.clone()
  }

  /// Turn interrupts into a flag until the guard is dropped.
  pub fn defer(&self) -> Deferred {
    self.deferred.store(true, Ordering::SeqCst);
    Deferred {
      deferred: self.deferred.clone(),
    }
  }

  #[cfg(test)]
  pub(crate) fn raise(&self) {
    self.requested.store(true, Ordering::SeqCst);
  }
}

#[must_use]
pub struct Deferred {
  deferred: Arc<AtomicBool>,
}

impl Drop for Deferred {
  fn drop(&mut self) {
    self.deferred.store(false, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_signal_exits_unless_deferred() {
    let interrupt = Interrupt::default();
    {
      let _guard = interrupt.defer();
      assert!(!interrupt.signal());
      assert!(interrupt.flag().load(Ordering::SeqCst));
    }
    assert!(interrupt.signal());
    assert!(interrupt.requested());
  }
}
