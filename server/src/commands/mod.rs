//! Chat commands
//!
//! A chat line starting with the configured prefix is parsed into a verb and
//! arguments and handed to the matching [`ChatCommand`]. Every invocation
//! runs in its own task, so a command that waits on a client (a teleport
//! asking for a session, say) never stalls the event loop. Errors are sent
//! back to the invoker as a red chat line; they never reach the server loop.
//!
//! Arguments are split on whitespace, with double quotes grouping words.
//! Integer arguments may be ranges: `3-7` and `3+4` both mean `3..=7`.

mod builtin;
mod race;

use crate::error::ServerError;
use crate::network::Server;
use crate::race::RaceError;
use async_trait::async_trait;
use log::{info, warn};
use shared::chunks::Color;
use shared::ConnectionId;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(String),
    #[error("you need to be an OP to do that")]
    NotOp,
    #[error("only players can do that")]
    PlayersOnly,
    #[error("player not found: {0}")]
    PlayerNotFound(String),
    #[error("you cannot kick {0}")]
    CannotKick(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Race(#[from] RaceError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoker {
    /// The server's own console. Outranks every OP.
    Console,
    Player(ConnectionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    Range(RangeInclusive<i64>),
    Text,
}

/// One parsed argument, keeping the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg {
    raw: String,
    value: ArgValue,
}

impl CommandArg {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            value: parse_value(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> &ArgValue {
        &self.value
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            ArgValue::Int(value) => Some(value),
            _ => None,
        }
    }

    /// Single integers count as one-element ranges.
    pub fn as_range(&self) -> Option<RangeInclusive<i64>> {
        match &self.value {
            ArgValue::Int(value) => Some(*value..=*value),
            ArgValue::Range(range) => Some(range.clone()),
            ArgValue::Text => None,
        }
    }
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_value(raw: &str) -> ArgValue {
    if let Ok(value) = raw.parse::<i64>() {
        return ArgValue::Int(value);
    }
    // skip the first byte so a leading sign is not taken as the separator
    let split = raw
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-' || *c == '+');
    if let Some((at, separator)) = split {
        let (from, to) = (&raw[..at], &raw[at + 1..]);
        if let (Ok(from), Ok(to)) = (from.parse::<i64>(), to.parse::<i64>()) {
            let end = if separator == '+' {
                from.checked_add(to)
            } else {
                Some(to)
            };
            if let Some(end) = end {
                return ArgValue::Range(from..=end);
            }
        }
    }
    ArgValue::Text
}

/// Splits on whitespace; double quotes group words and `\"` escapes a quote.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// A command line with the prefix already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Lower-cased.
    pub verb: String,
    pub args: Vec<CommandArg>,
    /// Everything after the verb, untouched.
    pub rest: String,
}

impl CommandLine {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (verb, rest) = match text.find(char::is_whitespace) {
            Some(at) => (&text[..at], text[at..].trim_start()),
            None => (text, ""),
        };
        if verb.is_empty() {
            return None;
        }
        Some(Self {
            verb: verb.to_lowercase(),
            args: tokenize(rest).iter().map(|t| CommandArg::parse(t)).collect(),
            rest: rest.to_string(),
        })
    }

    pub fn arg(&self, index: usize) -> Option<&CommandArg> {
        self.args.get(index)
    }
}

/// Everything a running command can reach.
pub struct CommandContext {
    pub server: Arc<Server>,
    pub invoker: Invoker,
    pub line: CommandLine,
}

impl CommandContext {
    /// Sends a line to whoever ran the command.
    pub async fn reply(&self, text: impl Into<String>) {
        let text = text.into();
        match self.invoker {
            Invoker::Console => info!("{}", text),
            Invoker::Player(id) => self.server.send_chat(id, text, Color::WHITE).await,
        }
    }

    pub fn player(&self) -> Result<ConnectionId, CommandError> {
        match self.invoker {
            Invoker::Player(id) => Ok(id),
            Invoker::Console => Err(CommandError::PlayersOnly),
        }
    }

    pub async fn invoker_name(&self) -> String {
        match self.invoker {
            Invoker::Console => self.server.settings().name.clone(),
            Invoker::Player(id) => self.server.player_name(id).await,
        }
    }

    pub fn usage(&self, args: &str) -> CommandError {
        CommandError::Usage(
            format!(
                "{}{} {}",
                self.server.settings().command_prefix,
                self.line.verb,
                args
            )
            .trim_end()
            .to_string(),
        )
    }

    /// Resolves a player argument by name or by `#id`.
    pub async fn target(&self, index: usize, usage: &str) -> Result<ConnectionId, CommandError> {
        let arg = self.line.arg(index).ok_or_else(|| self.usage(usage))?;
        self.server
            .find_player(arg.raw())
            .await
            .ok_or_else(|| CommandError::PlayerNotFound(arg.raw().to_string()))
    }
}

#[async_trait]
pub trait ChatCommand: Send + Sync {
    fn name(&self) -> &'static str;

    /// Argument synopsis shown by `help`.
    fn args(&self) -> &'static str {
        ""
    }

    fn help(&self) -> &'static str;

    fn requires_op(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &CommandContext) -> Result<(), CommandError>;
}

#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Arc<dyn ChatCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        race::register(&mut registry);
        registry
    }

    /// Adds a command, replacing any command of the same name.
    pub fn register(&mut self, command: Arc<dyn ChatCommand>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, verb: &str) -> Option<Arc<dyn ChatCommand>> {
        self.commands.get(verb).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChatCommand>> {
        self.commands.values()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.commands.keys()).finish()
    }
}

/// Parses and runs one command line.
pub async fn execute(
    server: Arc<Server>,
    invoker: Invoker,
    text: &str,
) -> Result<(), CommandError> {
    let line = CommandLine::parse(text).ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
    let command = server
        .commands()
        .get(&line.verb)
        .ok_or_else(|| CommandError::UnknownCommand(line.verb.clone()))?;
    if command.requires_op() && !server.is_op(invoker).await {
        return Err(CommandError::NotOp);
    }

    let ctx = CommandContext {
        server,
        invoker,
        line,
    };
    command.run(&ctx).await
}

/// Runs a command in its own task and reports failure to the invoker.
pub fn spawn(server: Arc<Server>, invoker: Invoker, text: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = execute(Arc::clone(&server), invoker, &text).await {
            match invoker {
                Invoker::Console => warn!("Command {:?} failed: {}", text, e),
                Invoker::Player(id) => server.send_chat(id, e.to_string(), Color::RED).await,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verb_and_rest() {
        let line = CommandLine::parse("  Broadcast hello   there ").unwrap();
        assert_eq!(line.verb, "broadcast");
        assert_eq!(line.rest, "hello   there");
        assert_eq!(line.args.len(), 2);
        assert!(CommandLine::parse("   ").is_none());
    }

    #[test]
    fn test_ranges() {
        assert_eq!(CommandArg::parse("3-7").as_range(), Some(3..=7));
        assert_eq!(CommandArg::parse("3+4").as_range(), Some(3..=7));
        assert_eq!(CommandArg::parse("5").as_range(), Some(5..=5));
        assert_eq!(CommandArg::parse("-5").as_int(), Some(-5));
        assert_eq!(CommandArg::parse("-2-3").as_range(), Some(-2..=3));
        assert_eq!(CommandArg::parse("a-b").value(), &ArgValue::Text);
        assert_eq!(CommandArg::parse("3-7").as_int(), None);
    }

    #[test]
    fn test_quoted_args() {
        let line = CommandLine::parse(r#"tp "Madeline Two" "3-7" "say \"hi\"""#).unwrap();
        let raw: Vec<_> = line.args.iter().map(CommandArg::raw).collect();
        assert_eq!(raw, vec!["Madeline Two", "3-7", "say \"hi\""]);
        assert_eq!(line.args[1].as_range(), Some(3..=7));
    }

    #[test]
    fn test_empty_quotes_are_an_argument() {
        let line = CommandLine::parse(r#"op """#).unwrap();
        assert_eq!(line.args.len(), 1);
        assert_eq!(line.args[0].raw(), "");
    }

    #[test]
    fn test_builtin_registry() {
        let registry = CommandRegistry::with_builtin();
        for verb in ["help", "op", "kick", "broadcast", "tp", "emote", "race", "rc"] {
            assert!(registry.get(verb).is_some(), "missing {}", verb);
        }
        assert!(registry.get("kick").unwrap().requires_op());
        assert!(!registry.get("help").unwrap().requires_op());
    }
}
