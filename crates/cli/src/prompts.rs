use std::io::{self, BufRead, IsTerminal, Write};

use koti_lib::confirm::Confirm;

/// Whether a prompt answer means yes. Anything else, including an empty line, is no.
pub fn parse_answer(input: &str) -> bool {
  matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Asks on stderr and reads the answer from stdin.
pub struct TerminalConfirm;

impl TerminalConfirm {
  fn ask(&self, message: &str, input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "{} [y/N] ", message)?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
      return Ok(false);
    }
    Ok(parse_answer(&answer))
  }
}

impl Confirm for TerminalConfirm {
  fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
      return Err(io::Error::other(
        "cannot prompt for confirmation in non-interactive mode; use --confirm-mode yolo to proceed",
      ));
    }
    self.ask(prompt, &mut io::stdin().lock(), &mut io::stderr())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_answer() {
    assert!(parse_answer("y\n"));
    assert!(parse_answer(" YES "));
    assert!(!parse_answer("\n"));
    assert!(!parse_answer("nope"));
  }

  #[test]
  fn test_ask_writes_prompt() {
    let mut output = Vec::new();
    let agreed = TerminalConfirm
      .ask("remove /etc/motd [cleanup]", &mut "y\n".as_bytes(), &mut output)
      .unwrap();
    assert!(agreed);
    assert_eq!(String::from_utf8(output).unwrap(), "remove /etc/motd [cleanup] [y/N] ");
  }

  #[test]
  fn test_ask_at_eof_declines() {
    let mut output = Vec::new();
    assert!(!TerminalConfirm.ask("x", &mut "".as_bytes(), &mut output).unwrap());
  }
}
