//! Operator command parsing.

use std::fmt;

use thiserror::Error;

use crate::session::SessionId;

/// A parsed operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List active sessions.
    Sessions,
    /// Show the command reference.
    Help,
    /// Attach a shell bridge to a session.
    Use(SessionId),
    /// Close and remove a session.
    Kill(SessionId),
    /// Leave the console.
    Exit,
}

/// Malformed operator input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no input received, please provide a valid command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0} <number>")]
    MissingArgument(&'static str),

    #[error("invalid session number: {0}")]
    InvalidSessionId(String),

    #[error("{0} takes no argument")]
    UnexpectedArgument(&'static str),
}

/// One row of the command reference.
pub struct CommandHelp {
    pub usage: &'static str,
    pub description: &'static str,
}

/// The static command reference.
pub const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        usage: "sessions",
        description: "List active connections",
    },
    CommandHelp {
        usage: "use <number>",
        description: "Open shell in specified session",
    },
    CommandHelp {
        usage: "kill <number>",
        description: "Kill the specified session",
    },
    CommandHelp {
        usage: "help",
        description: "Show this help menu",
    },
    CommandHelp {
        usage: "exit",
        description: "Exit the program",
    },
];

impl Command {
    /// Parses one line of operator input.
    ///
    /// The line is split on the first whitespace run into a verb and an
    /// optional argument.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, Some(rest.trim())),
            None => (line, None),
        };

        match verb {
            "sessions" => no_argument("sessions", arg).map(|()| Command::Sessions),
            "help" => no_argument("help", arg).map(|()| Command::Help),
            "exit" => no_argument("exit", arg).map(|()| Command::Exit),
            "use" => session_argument("use", arg).map(Command::Use),
            "kill" => session_argument("kill", arg).map(Command::Kill),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Sessions => write!(f, "sessions"),
            Command::Help => write!(f, "help"),
            Command::Use(id) => write!(f, "use {id}"),
            Command::Kill(id) => write!(f, "kill {id}"),
            Command::Exit => write!(f, "exit"),
        }
    }
}

fn no_argument(verb: &'static str, arg: Option<&str>) -> Result<(), CommandError> {
    match arg {
        Some(_) => Err(CommandError::UnexpectedArgument(verb)),
        None => Ok(()),
    }
}

fn session_argument(verb: &'static str, arg: Option<&str>) -> Result<SessionId, CommandError> {
    let arg = arg.ok_or(CommandError::MissingArgument(verb))?;
    arg.parse()
        .map_err(|_| CommandError::InvalidSessionId(arg.to_string()))
}

/// Renders the command reference.
pub fn help_text() -> String {
    let mut text = String::from("\nAvailable Commands:\n---------------------------\n");
    for command in COMMANDS {
        text.push_str(&format!("{:<16} {}\n", command.usage, command.description));
    }
    text.push_str("---------------------------\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(Command::parse("sessions"), Ok(Command::Sessions));
        assert_eq!(Command::parse("help"), Ok(Command::Help));
        assert_eq!(Command::parse("exit"), Ok(Command::Exit));
        assert_eq!(Command::parse("  exit \n"), Ok(Command::Exit));
    }

    #[test]
    fn test_parse_session_commands() {
        assert_eq!(Command::parse("use 1"), Ok(Command::Use(1)));
        assert_eq!(Command::parse("kill 12"), Ok(Command::Kill(12)));
        assert_eq!(Command::parse("use    7  "), Ok(Command::Use(7)));
        assert_eq!(Command::parse("kill\t3"), Ok(Command::Kill(3)));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
    }

    #[test]
    fn test_parse_missing_argument() {
        assert_eq!(Command::parse("use"), Err(CommandError::MissingArgument("use")));
        assert_eq!(Command::parse("kill"), Err(CommandError::MissingArgument("kill")));
    }

    #[test]
    fn test_parse_invalid_session_id() {
        assert_eq!(
            Command::parse("use one"),
            Err(CommandError::InvalidSessionId("one".to_string()))
        );
        assert_eq!(
            Command::parse("kill -1"),
            Err(CommandError::InvalidSessionId("-1".to_string()))
        );
        assert_eq!(
            Command::parse("use 1 2"),
            Err(CommandError::InvalidSessionId("1 2".to_string()))
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            Command::parse("user 1"),
            Err(CommandError::Unknown("user".to_string()))
        );
        assert_eq!(
            Command::parse("sessionsx"),
            Err(CommandError::Unknown("sessionsx".to_string()))
        );
    }

    #[test]
    fn test_parse_unexpected_argument() {
        assert_eq!(
            Command::parse("sessions all"),
            Err(CommandError::UnexpectedArgument("sessions"))
        );
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for command in [Command::Sessions, Command::Use(4), Command::Kill(9), Command::Exit] {
            assert_eq!(Command::parse(&command.to_string()), Ok(command));
        }
    }

    #[test]
    fn test_help_text_lists_every_command() {
        let text = help_text();
        for command in COMMANDS {
            assert!(text.contains(command.usage));
        }
    }
}
