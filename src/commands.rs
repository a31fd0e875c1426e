/// Interactive shell commands and their parsing

#[derive(Debug, Clone)]
pub struct CommandSpec {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[CommandSpec] = &[
  CommandSpec {
    name: "more",
    aliases: &["m", "next"],
    usage: "more",
    description: "Load the next page of jobs",
  },
  CommandSpec {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh",
    description: "Drop cached lists and reload from the network",
  },
  CommandSpec {
    name: "done",
    aliases: &["d", "complete"],
    usage: "done <id>",
    description: "Mark a job completed",
  },
  CommandSpec {
    name: "status",
    aliases: &["s"],
    usage: "status <id> <status>",
    description: "Set a job's status",
  },
  CommandSpec {
    name: "queue",
    aliases: &["pending"],
    usage: "queue",
    description: "Show writes waiting for the network",
  },
  CommandSpec {
    name: "hide",
    aliases: &["away"],
    usage: "hide",
    description: "Mark the client hidden",
  },
  CommandSpec {
    name: "show",
    aliases: &["back"],
    usage: "show",
    description: "Mark the client visible again",
  },
  CommandSpec {
    name: "logout",
    aliases: &[],
    usage: "logout",
    description: "End the work session",
  },
  CommandSpec {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  CommandSpec {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit fieldsync",
  },
];

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
  More,
  Refresh,
  Done(String),
  Status { id: String, status: String },
  Queue,
  Hide,
  Show,
  Logout,
  Help,
  Quit,
  Empty,
}

fn lookup(word: &str) -> Option<&'static CommandSpec> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|c| c.name == word || c.aliases.contains(&word.as_str()))
}

/// Parse one input line. The error is a message for the user.
pub fn parse(line: &str) -> Result<ShellCommand, String> {
  let mut words = line.split_whitespace();
  let Some(first) = words.next() else {
    return Ok(ShellCommand::Empty);
  };
  let args: Vec<&str> = words.collect();

  let Some(spec) = lookup(first) else {
    return Err(unknown(first));
  };

  let command = match (spec.name, args.as_slice()) {
    ("more", []) => ShellCommand::More,
    ("refresh", []) => ShellCommand::Refresh,
    ("done", [id]) => ShellCommand::Done(id.to_string()),
    ("status", [id, status]) => ShellCommand::Status {
      id: id.to_string(),
      status: status.to_string(),
    },
    ("queue", []) => ShellCommand::Queue,
    ("hide", []) => ShellCommand::Hide,
    ("show", []) => ShellCommand::Show,
    ("logout", []) => ShellCommand::Logout,
    ("help", _) => ShellCommand::Help,
    ("quit", []) => ShellCommand::Quit,
    _ => return Err(format!("usage: {}", spec.usage)),
  };
  Ok(command)
}

fn unknown(word: &str) -> String {
  let word = word.to_lowercase();
  let close: Vec<&str> = COMMANDS
    .iter()
    .filter(|c| c.name.starts_with(&word) || c.aliases.iter().any(|a| a.starts_with(&word)))
    .map(|c| c.name)
    .collect();

  if close.is_empty() {
    format!("unknown command '{}', try 'help'", word)
  } else {
    format!("unknown command '{}', did you mean: {}", word, close.join(", "))
  }
}

/// One line per command for `help`.
pub fn help_lines() -> Vec<String> {
  COMMANDS
    .iter()
    .map(|c| format!("  {:<22} {}", c.usage, c.description))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_names_and_aliases() {
    assert_eq!(parse("more"), Ok(ShellCommand::More));
    assert_eq!(parse("  M "), Ok(ShellCommand::More));
    assert_eq!(parse("done J1"), Ok(ShellCommand::Done("J1".into())));
    assert_eq!(
      parse("s J2 in_progress"),
      Ok(ShellCommand::Status {
        id: "J2".into(),
        status: "in_progress".into()
      })
    );
    assert_eq!(parse("exit"), Ok(ShellCommand::Quit));
    assert_eq!(parse(""), Ok(ShellCommand::Empty));
  }

  #[test]
  fn test_wrong_arity_shows_usage() {
    assert_eq!(parse("done"), Err("usage: done <id>".to_string()));
    assert_eq!(parse("more 2"), Err("usage: more".to_string()));
  }

  #[test]
  fn test_unknown_suggests_prefix_matches() {
    let err = parse("lo").unwrap_err();
    assert!(err.contains("logout"));
    assert!(parse("xyz").unwrap_err().contains("try 'help'"));
  }

  #[test]
  fn test_help_covers_every_command() {
    assert_eq!(help_lines().len(), COMMANDS.len());
  }
}
