//! Operator commands typed at the server console.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the loaded script.
    List,
    /// Ask the 1-based script question.
    Start(usize),
    Stop,
    Abort,
    Users,
    /// Print the answer tallies.
    Log,
    Stats,
    /// Write the response log to disk.
    Save,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown command: {} (try `help`)", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for ConsoleCommand {
    type Err = UnknownCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next(), words.next()) {
            (Some("list"), None, _) => ConsoleCommand::List,
            (Some("start"), Some(n), None) => match n.parse() {
                Ok(n) if n > 0 => ConsoleCommand::Start(n),
                _ => return Err(UnknownCommand(line.trim().to_string())),
            },
            (Some("stop"), None, _) => ConsoleCommand::Stop,
            (Some("abort"), None, _) => ConsoleCommand::Abort,
            (Some("users"), None, _) => ConsoleCommand::Users,
            (Some("log"), None, _) => ConsoleCommand::Log,
            (Some("stats"), None, _) => ConsoleCommand::Stats,
            (Some("save"), None, _) => ConsoleCommand::Save,
            (Some("help" | "?"), None, _) => ConsoleCommand::Help,
            (Some("quit" | "exit"), None, _) => ConsoleCommand::Quit,
            _ => return Err(UnknownCommand(line.trim().to_string())),
        };
        Ok(command)
    }
}

pub const HELP: &str = "\
list      show the script
start N   ask question N
stop      close the question, keeping its answers
abort     close the question, discarding it
users     show connected users
log       show answer tallies
stats     show server statistics
save      write the response log
quit      shut down";
