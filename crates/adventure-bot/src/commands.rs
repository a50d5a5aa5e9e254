//! Parsing chat messages into bot commands.
//!
//! Two shapes are recognised: `!adventure <arg>` for session lifecycle and
//! `> text` for input to the running program. `!help` is answered too.

pub const SHORT_DESCRIPTION: &str = "play the classic text adventure 'adventure'";

pub const DESCRIPTION: &str =
    "'adventure' can play the classic text adventure aptly named 'adventure'.\n";

pub const USAGE: &str = "!adventure start|stop|restart - start/stop/restart the adventure\n\
     !adventure status - check if there's currently an adventure running\n\
     > your command here - send a command to the adventure, if currently running\n";

pub const AUTHOR: &str = "Created by @Garmy using github.com/Garmelon/yaboli\n";

pub const CREDITS: &str = "Uses the 'adventure' program. Thanks to Xyzzy for all the help!\n";

/// Long help text, sent for `!help @<nick>`.
pub fn long_help() -> String {
    format!("{DESCRIPTION}{USAGE}{AUTHOR}{CREDITS}")
}

/// Argument to `!adventure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
    Restart,
    Status,
}

impl Lifecycle {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Lifecycle(Lifecycle),
    /// `!adventure` with an argument it doesn't know.
    Unknown(String),
    /// `!adventure` with no arguments or too many.
    Usage,
    /// `> ...`; the text is trimmed and may be empty.
    Input(String),
    /// `!help`, or `!help @<nick>` when `specific`.
    Help { specific: bool },
}

impl Command {
    /// Parse a message body. `nick` is the bot's own nick in the room.
    ///
    /// Returns `None` for messages that aren't meant for the bot.
    pub fn parse(content: &str, nick: &str) -> Option<Self> {
        // Only the first line counts; the rest of a message is never a command.
        let line = content.lines().next().unwrap_or("");

        if let Some(rest) = line.strip_prefix('>') {
            return Some(Self::Input(rest.trim().to_string()));
        }

        let mut words = line.split_whitespace();
        let name = words.next()?.strip_prefix('!')?;
        let args: Vec<&str> = words.collect();

        match name {
            "adventure" => Some(match args.as_slice() {
                [arg] => match Lifecycle::parse(arg) {
                    Some(lifecycle) => Self::Lifecycle(lifecycle),
                    None => Self::Unknown((*arg).to_string()),
                },
                _ => Self::Usage,
            }),
            "help" => match args.as_slice() {
                [] => Some(Self::Help { specific: false }),
                [target] => {
                    let target = target.strip_prefix('@')?;
                    similar_nick(target, nick).then_some(Self::Help { specific: true })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Nick comparison the way chat clients mention people: case and
/// whitespace don't matter.
pub fn similar_nick(a: &str, b: &str) -> bool {
    normalize_nick(a) == normalize_nick(b)
}

fn normalize_nick(nick: &str) -> String {
    nick.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Option<Command> {
        Command::parse(content, "Adventure Bot")
    }

    #[test]
    fn test_lifecycle_commands() {
        assert_eq!(parse("!adventure start"), Some(Command::Lifecycle(Lifecycle::Start)));
        assert_eq!(parse("!adventure stop"), Some(Command::Lifecycle(Lifecycle::Stop)));
        assert_eq!(parse("!adventure  restart "), Some(Command::Lifecycle(Lifecycle::Restart)));
        assert_eq!(parse("!adventure status"), Some(Command::Lifecycle(Lifecycle::Status)));
    }

    #[test]
    fn test_unknown_and_usage() {
        assert_eq!(parse("!adventure dance"), Some(Command::Unknown("dance".into())));
        assert_eq!(parse("!adventure"), Some(Command::Usage));
        assert_eq!(parse("!adventure start now"), Some(Command::Usage));
    }

    #[test]
    fn test_input_trigger() {
        assert_eq!(parse("> go north"), Some(Command::Input("go north".into())));
        assert_eq!(parse(">get lamp  "), Some(Command::Input("get lamp".into())));
        assert_eq!(parse(">   "), Some(Command::Input(String::new())));
        assert_eq!(parse("> xyzzy\nplugh"), Some(Command::Input("xyzzy".into())));
    }

    #[test]
    fn test_ignored_messages() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("go > north"), None);
        assert_eq!(parse("!ping"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_help() {
        assert_eq!(parse("!help"), Some(Command::Help { specific: false }));
        assert_eq!(parse("!help @adventurebot"), Some(Command::Help { specific: true }));
        assert_eq!(parse("!help @someone"), None);
        assert_eq!(parse("!help adventurebot"), None);
    }

    #[test]
    fn test_similar_nick() {
        assert!(similar_nick("Adventure Bot", "adventurebot"));
        assert!(!similar_nick("adventure", "adventurebot"));
    }

    #[test]
    fn test_long_help_mentions_usage() {
        let help = long_help();
        assert!(help.starts_with(DESCRIPTION));
        assert!(help.contains("!adventure status"));
        assert!(help.ends_with(&format!("{AUTHOR}{CREDITS}")));
    }
}
