//! External command invocation.
//!
//! Managers never spawn processes directly. They describe the command with a
//! [`Cmd`] and hand it to a [`CommandRunner`]: [`SystemRunner`] runs it for
//! real, [`RecordingRunner`] records it and answers queries from scripted
//! responses.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("failed to spawn '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("command '{cmd}' failed with exit code {}", exit_code(.code))]
  Failed { cmd: String, code: Option<i32> },
}

fn exit_code(code: &Option<i32>) -> String {
  code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
  program: String,
  args: Vec<String>,
}

impl Cmd {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  /// `sh -c <script>`.
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new("sh").arg("-c").arg(script)
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn get_args(&self) -> &[String] {
    &self.args
  }

  fn command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    command
  }
}

impl fmt::Display for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.program)?;
    for arg in &self.args {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

/// Result of a query command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  pub success: bool,
  pub code: Option<i32>,
  pub stdout: String,
}

impl CommandOutput {
  pub fn ok(stdout: impl Into<String>) -> Self {
    Self {
      success: true,
      code: Some(0),
      stdout: stdout.into(),
    }
  }

  pub fn failed(code: i32) -> Self {
    Self {
      success: false,
      code: Some(code),
      stdout: String::new(),
    }
  }

  /// Non-empty trimmed lines of stdout.
  pub fn lines(&self) -> impl Iterator<Item = &str> {
    self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
  }
}

pub trait CommandRunner {
  /// Run with the operator's terminal attached; a non-zero exit is an error.
  fn run(&self, cmd: &Cmd) -> Result<(), CommandError>;

  /// Run and capture stdout; a non-zero exit is reported, not raised.
  fn capture(&self, cmd: &Cmd) -> Result<CommandOutput, CommandError>;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
  fn run(&self, cmd: &Cmd) -> Result<(), CommandError> {
    info!(cmd = %cmd, "running");

    let status = cmd.command().status().map_err(|source| CommandError::Spawn {
      cmd: cmd.to_string(),
      source,
    })?;

    if !status.success() {
      return Err(CommandError::Failed {
        cmd: cmd.to_string(),
        code: status.code(),
      });
    }
    Ok(())
  }

  fn capture(&self, cmd: &Cmd) -> Result<CommandOutput, CommandError> {
    debug!(cmd = %cmd, "querying");

    let output = cmd
      .command()
      .stdin(Stdio::null())
      .output()
      .map_err(|source| CommandError::Spawn {
        cmd: cmd.to_string(),
        source,
      })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
      debug!(stderr = %stderr.trim(), "command stderr");
    }

    Ok(CommandOutput {
      success: output.status.success(),
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
  }
}

/// One command seen by a [`RecordingRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub cmd: String,
  /// `true` for queries, `false` for commands run for their side effect.
  pub captured: bool,
}

/// Records every command instead of spawning it.
///
/// Queries are answered from scripted responses, matched on the rendered
/// command line; the most recent matching script wins. Unscripted queries
/// fail with exit code 1, which managers read as "not present". Commands run
/// for their side effect succeed unless scripted to fail.
#[derive(Debug, Default)]
pub struct RecordingRunner {
  invocations: RefCell<Vec<Invocation>>,
  responses: RefCell<Vec<(String, CommandOutput)>>,
  failures: RefCell<Vec<String>>,
}

impl RecordingRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer the query `cmd` (or any query starting with it) with `output`.
  pub fn respond(&self, cmd: impl Into<String>, output: CommandOutput) {
    self.responses.borrow_mut().push((cmd.into(), output));
  }

  /// Make `cmd` fail when run.
  pub fn fail(&self, cmd: impl Into<String>) {
    self.failures.borrow_mut().push(cmd.into());
  }

  pub fn invocations(&self) -> Vec<Invocation> {
    self.invocations.borrow().clone()
  }

  /// Command lines run for their side effect, in order.
  pub fn executed(&self) -> Vec<String> {
    self
      .invocations
      .borrow()
      .iter()
      .filter(|i| !i.captured)
      .map(|i| i.cmd.clone())
      .collect()
  }

  pub fn clear(&self) {
    self.invocations.borrow_mut().clear();
  }

  fn record(&self, cmd: &Cmd, captured: bool) -> String {
    let line = cmd.to_string();
    self.invocations.borrow_mut().push(Invocation {
      cmd: line.clone(),
      captured,
    });
    line
  }
}

impl CommandRunner for RecordingRunner {
  fn run(&self, cmd: &Cmd) -> Result<(), CommandError> {
    let line = self.record(cmd, false);
    if self.failures.borrow().iter().any(|f| line.starts_with(f.as_str())) {
      return Err(CommandError::Failed { cmd: line, code: Some(1) });
    }
    Ok(())
  }

  fn capture(&self, cmd: &Cmd) -> Result<CommandOutput, CommandError> {
    let line = self.record(cmd, true);
    let responses = self.responses.borrow();
    let output = responses
      .iter()
      .rev()
      .find(|(prefix, _)| line.starts_with(prefix.as_str()))
      .map(|(_, output)| output.clone())
      .unwrap_or_else(|| CommandOutput::failed(1));
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_quotes_whitespace() {
    let cmd = Cmd::new("systemctl").args(["enable", "--now", "foo.service"]);
    assert_eq!(cmd.to_string(), "systemctl enable --now foo.service");

    let cmd = Cmd::shell("echo 'hi' there");
    assert_eq!(cmd.to_string(), "sh -c 'echo '\\''hi'\\'' there'");
  }

  #[test]
  fn system_runner_captures_stdout() {
    let out = SystemRunner.capture(&Cmd::new("echo").arg("hello")).unwrap();
    assert!(out.success);
    assert_eq!(out.lines().collect::<Vec<_>>(), ["hello"]);
  }

  #[test]
  fn system_runner_reports_failure() {
    let out = SystemRunner.capture(&Cmd::new("false")).unwrap();
    assert!(!out.success);

    let err = SystemRunner.run(&Cmd::new("false")).unwrap_err();
    assert!(matches!(err, CommandError::Failed { code: Some(1), .. }));
  }

  #[test]
  fn system_runner_missing_program() {
    let err = SystemRunner.run(&Cmd::new("koti-definitely-not-a-program")).unwrap_err();
    assert!(matches!(err, CommandError::Spawn { .. }));
  }

  #[test]
  fn recording_runner_scripts_queries() {
    let runner = RecordingRunner::new();
    runner.respond("pacman -Qq", CommandOutput::ok("foo\nbar\n"));
    runner.respond("pacman -Qq foo", CommandOutput::ok("foo\n"));

    let all = runner.capture(&Cmd::new("pacman").arg("-Qq")).unwrap();
    assert_eq!(all.lines().count(), 2);
    let one = runner.capture(&Cmd::new("pacman").args(["-Qq", "foo"])).unwrap();
    assert_eq!(one.stdout, "foo\n");
    let missing = runner.capture(&Cmd::new("systemctl").arg("is-enabled")).unwrap();
    assert!(!missing.success);
  }

  #[test]
  fn recording_runner_records_side_effects() {
    let runner = RecordingRunner::new();
    runner.fail("mkswap");

    runner.run(&Cmd::new("swapon").arg("/swap")).unwrap();
    runner.capture(&Cmd::new("swapon").arg("--show")).unwrap();
    assert!(runner.run(&Cmd::new("mkswap").arg("/swap")).is_err());

    assert_eq!(runner.executed(), ["swapon /swap", "mkswap /swap"]);
    assert_eq!(runner.invocations().len(), 3);
  }
}
