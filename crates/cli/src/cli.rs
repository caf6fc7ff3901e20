use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use koti_lib::confirm::ConfirmMode;
use koti_lib::consts::APP_NAME;

use crate::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about = "Converge this host to its declared configuration")]
pub struct Cli {
  #[command(flatten)]
  pub global: GlobalOptions,

  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOptions {
  /// Default confirm mode for items that do not set a stricter one
  #[arg(long, global = true, default_value = "cautious")]
  pub confirm_mode: ConfirmMode,

  /// Directory for manager stores and the run lock (defaults to $KOTI_CACHE_DIR or /var/cache/koti)
  #[arg(long, global = true)]
  pub cache_dir: Option<PathBuf>,

  /// Do not print the section summary
  #[arg(long, global = true)]
  pub no_sections: bool,

  /// Do not print the item summary
  #[arg(long, global = true)]
  pub no_items: bool,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Show what applying would change, without changing anything
  Plan {
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
  },

  /// Plan, confirm and converge the system
  Apply {
    /// Pause after each executed action
    #[arg(long, default_value_t = 0)]
    pacing_ms: u64,
  },
}
