//! The foreign command list.
//!
//! Commands are looked up by name. Each insertion gets a fresh
//! [`CommandId`], so a command that replaces another under the same name has
//! a distinct identity.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{NativeError, NativeResult};
use crate::types::CommandStatus;

/// Identity of one inserted command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// Entry point invoked with the command identity and its argument vector
/// (the command name excluded).
pub type CommandEntry = Arc<dyn Fn(CommandId, &[String]) -> CommandStatus + Send + Sync>;

/// Public view of a command.
#[derive(Clone)]
pub struct CommandInfo {
    pub id: CommandId,
    pub name: String,
    pub args_help: Option<String>,
    pub entry: CommandEntry,
}

impl std::fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("args_help", &self.args_help)
            .finish_non_exhaustive()
    }
}

/// Operations the bridge consumes from the command subsystem.
pub trait CommandStore: Send + Sync {
    fn find_command(&self, name: &str) -> Option<CommandInfo>;
    /// Insert a command. Returns the identity of the command it replaced.
    fn insert_command(
        &self,
        name: &str,
        args_help: Option<String>,
        entry: CommandEntry,
    ) -> (CommandId, Option<CommandId>);
    fn remove_command(&self, name: &str) -> bool;
    /// Remove `name` only while it still refers to `id`.
    fn remove_command_if(&self, name: &str, id: CommandId) -> bool;
    /// Tokenize and run a command line.
    fn execute(&self, line: &str) -> NativeResult<CommandStatus>;
}

#[derive(Default)]
struct CommandState {
    commands: FxHashMap<String, CommandInfo>,
    next_id: u64,
}

#[derive(Default)]
pub struct CommandList {
    state: Mutex<CommandState>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().commands.keys().cloned().collect();
        names.sort();
        names
    }
}

impl CommandStore for CommandList {
    fn find_command(&self, name: &str) -> Option<CommandInfo> {
        self.state.lock().commands.get(name).cloned()
    }

    fn insert_command(
        &self,
        name: &str,
        args_help: Option<String>,
        entry: CommandEntry,
    ) -> (CommandId, Option<CommandId>) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = CommandId(state.next_id);
        let info = CommandInfo {
            id,
            name: name.to_string(),
            args_help,
            entry,
        };
        let replaced = state.commands.insert(name.to_string(), info).map(|old| old.id);
        tracing::debug!(name, %id, replaced = replaced.is_some(), "inserted command");
        (id, replaced)
    }

    fn remove_command(&self, name: &str) -> bool {
        self.state.lock().commands.remove(name).is_some()
    }

    fn remove_command_if(&self, name: &str, id: CommandId) -> bool {
        let mut state = self.state.lock();
        if state.commands.get(name).is_some_and(|c| c.id == id) {
            state.commands.remove(name);
            return true;
        }
        false
    }

    fn execute(&self, line: &str) -> NativeResult<CommandStatus> {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let Some(name) = tokens.next() else {
            return Ok(CommandStatus::Usage);
        };
        let argv: Vec<String> = tokens.collect();
        let command = self
            .find_command(&name)
            .ok_or_else(|| NativeError::UnknownCommand(name.clone()))?;
        tracing::trace!(name, argc = argv.len(), "executing command");
        Ok((command.entry)(command.id, &argv))
    }
}
