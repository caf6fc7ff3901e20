//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status
//! messages, change markers for sections, items and actions, and the
//! logger buffer.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use koti_lib::action::ChangeKind;
use koti_lib::log::{Level, LogMessage};
use koti_lib::planner::{ItemSummary, Phase, PlannedAction, SectionSummary};
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const CHANGED: &str = "~";
  pub const UNCHANGED: &str = "-";
}

/// `~` for any change, `-` for none. The kind of change is carried by color:
/// green installs, yellow updates, red removals.
pub fn change_symbol(change: Option<ChangeKind>) -> &'static str {
  match change {
    Some(_) => symbols::CHANGED,
    None => symbols::UNCHANGED,
  }
}

fn colored_symbol(change: Option<ChangeKind>) -> String {
  let symbol = change_symbol(change);
  match change {
    Some(ChangeKind::Install) => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Some(ChangeKind::Update) => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Some(ChangeKind::Remove) => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    None => symbol.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
  }
}

/// One plan line without the change marker, e.g. `write /etc/hosts (content) [cleanup]`.
pub fn describe_action(action: &PlannedAction) -> String {
  let mut line = action.description.clone();
  if let Some(info) = &action.additional_info {
    line.push_str(&format!(" ({})", info));
  }
  if action.phase == Phase::Cleanup {
    line.push_str(" [cleanup]");
  }
  if action.destructive {
    line.push_str(" [destructive]");
  }
  line
}

pub fn describe_section(section: &SectionSummary) -> String {
  match &section.description {
    Some(description) => format!("{}: {}", section.name, description),
    None => section.name.clone(),
  }
}

pub fn describe_item(item: &ItemSummary) -> String {
  if item.declared {
    item.item.clone()
  } else {
    format!("{} (no longer declared)", item.item)
  }
}

pub fn print_header(title: &str) {
  println!();
  println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
}

pub fn print_sections(sections: &[SectionSummary]) {
  print_header("Sections");
  for section in sections {
    let line = describe_section(section);
    match section.change {
      Some(_) => println!("  {} {}", colored_symbol(section.change), line),
      None => println!(
        "  {} {}",
        colored_symbol(None),
        line.if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
    }
  }
}

/// Items that change; unchanged items are only counted.
pub fn print_items(items: &[ItemSummary]) {
  print_header("Items");
  let mut unchanged = 0;
  for item in items {
    if item.change.is_none() {
      unchanged += 1;
      continue;
    }
    println!("  {} {}", colored_symbol(item.change), describe_item(item));
  }
  if unchanged > 0 {
    print_stat("unchanged", &unchanged.to_string());
  }
}

pub fn print_actions(actions: &[PlannedAction]) {
  print_header("Actions");
  if actions.is_empty() {
    print_success("Nothing to do");
    return;
  }
  for (idx, action) in actions.iter().enumerate() {
    println!(
      "  {:>3}. {} {}",
      idx + 1,
      colored_symbol(Some(action.change)),
      describe_action(action)
    );
  }
}

pub fn print_messages(messages: &[LogMessage]) {
  for message in messages {
    match message.level {
      Level::Info => print_info(&message.text),
      Level::Warn => print_warning(&message.text),
      Level::Error => print_error(&message.text),
    }
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn action(phase: Phase, info: Option<&str>, destructive: bool) -> PlannedAction {
    PlannedAction {
      phase,
      description: "remove /etc/motd".to_string(),
      additional_info: info.map(str::to_string),
      change: ChangeKind::Remove,
      destructive,
    }
  }

  #[test]
  fn test_change_symbol() {
    assert_eq!(change_symbol(Some(ChangeKind::Install)), "~");
    assert_eq!(change_symbol(Some(ChangeKind::Remove)), "~");
    assert_eq!(change_symbol(None), "-");
  }

  #[test]
  fn test_describe_action() {
    assert_eq!(describe_action(&action(Phase::Install, None, false)), "remove /etc/motd");
    assert_eq!(
      describe_action(&action(Phase::Cleanup, Some("file"), true)),
      "remove /etc/motd (file) [cleanup] [destructive]"
    );
  }

  #[test]
  fn test_describe_item() {
    let mut item = ItemSummary {
      item: "package vim".to_string(),
      change: Some(ChangeKind::Remove),
      declared: true,
    };
    assert_eq!(describe_item(&item), "package vim");
    item.declared = false;
    assert_eq!(describe_item(&item), "package vim (no longer declared)");
  }

  #[test]
  fn test_describe_section() {
    let section = SectionSummary {
      name: "base".to_string(),
      description: Some("core packages".to_string()),
      change: None,
    };
    assert_eq!(describe_section(&section), "base: core packages");
  }

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
    assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
  }
}
