//! koti-cli: operator front end for koti-lib.
//!
//! A host configuration is a small binary that implements [`HostConfig`] and
//! hands it to [`run`]:
//!
//! ```no_run
//! use koti_cli::HostConfig;
//! use koti_lib::item::Package;
//! use koti_lib::section::Section;
//!
//! struct Laptop;
//!
//! impl HostConfig for Laptop {
//!   fn sections(&self) -> Vec<Section> {
//!     vec![Section::new("base").item(Package::new("vim"))]
//!   }
//! }
//!
//! fn main() -> std::process::ExitCode {
//!   koti_cli::run(&Laptop)
//! }
//! ```

pub mod cli;
pub mod cmd;
pub mod interrupt;
pub mod output;
pub mod prompts;

use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use koti_lib::manager::Manager;
use koti_lib::managers;
use koti_lib::planner::build_model;
use koti_lib::platform::{self, paths};
use koti_lib::section::Section;
use koti_lib::shell::{CommandRunner, SystemRunner};
use koti_lib::store::StoreError;
use koti_lib::store_lock::StoreLock;

use crate::cli::{Cli, Commands};
use crate::cmd::{Outcome, cmd_apply, cmd_plan};
use crate::interrupt::{EXIT_CANCELLED, Interrupt};
use crate::output::print_error;
use crate::prompts::TerminalConfirm;

/// The desired state of one host.
pub trait HostConfig {
  fn sections(&self) -> Vec<Section>;

  /// Managers in install order. Defaults to the stock set.
  fn managers(&self, cache_dir: &Path, runner: Rc<dyn CommandRunner>) -> Result<Vec<Box<dyn Manager>>, StoreError> {
    managers::defaults(cache_dir, runner)
  }
}

/// Parse arguments, then plan or apply `host`.
pub fn run(host: &dyn HostConfig) -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.global.verbose);

  match dispatch(host, cli) {
    Ok(Outcome::Done) => ExitCode::SUCCESS,
    Ok(Outcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}

fn init_tracing(verbose: bool) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .without_time()
    .with_writer(std::io::stderr)
    .init();
}

fn dispatch(host: &dyn HostConfig, cli: Cli) -> Result<Outcome> {
  let interrupt = Interrupt::install()?;

  if !platform::is_root() {
    bail!("koti must run as root");
  }

  let options = cli.global;
  let cache_dir = options.cache_dir.clone().unwrap_or_else(paths::cache_dir);
  let command = match cli.command {
    Commands::Plan { .. } => "plan",
    Commands::Apply { .. } => "apply",
  };
  let _lock = StoreLock::acquire(&cache_dir, command).context("Failed to acquire run lock")?;
  debug!(cache_dir = %cache_dir.display(), command, "lock acquired");

  let managers = host
    .managers(&cache_dir, Rc::new(SystemRunner))
    .context("Failed to open manager stores")?;
  let model = build_model(host.sections(), managers, options.confirm_mode).context("Invalid configuration")?;

  match cli.command {
    Commands::Plan { format } => cmd_plan(model, &options, format, &interrupt),
    Commands::Apply { pacing_ms } => cmd_apply(
      model,
      &options,
      &mut TerminalConfirm,
      Duration::from_millis(pacing_ms),
      &interrupt,
    ),
  }
}
