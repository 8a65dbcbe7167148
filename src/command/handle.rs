use std::fmt;
use std::sync::Arc;

use parambridge_native::CommandId;

use crate::bridge::registry::EntryOwner;
use crate::bridge::{OwnershipState, trampoline};
use crate::bridge::ownership::handle_state;
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{Runtime, RuntimeShared, ScriptFunction, TokenCell, TokenGuard, Value};

/// Where a command's entry point lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOrigin {
    /// Registered by the foreign subsystem.
    Native,
    /// Registered through [`Command::create`]; runs a script function.
    Script,
}

pub(crate) struct CommandState {
    function: Option<ScriptFunction>,
    keep_alive: Option<Arc<CommandInner>>,
    destroyed: bool,
}

pub(crate) struct CommandInner {
    runtime: Arc<RuntimeShared>,
    id: CommandId,
    name: String,
    args_help: Option<String>,
    origin: CommandOrigin,
    state: TokenCell<CommandState>,
}

impl CommandInner {
    fn release(&self, guard: &TokenGuard<'_>) {
        let function = {
            let mut state = self.state.borrow_mut(guard);
            state.destroyed = true;
            state.function.take()
        };
        drop(function);

        let owner = self
            .runtime
            .commands
            .borrow_mut(guard)
            .remove(&self.id, self as *const CommandInner);
        if owner == EntryOwner::Other || self.origin == CommandOrigin::Native {
            return;
        }
        let removed = self
            .runtime
            .native
            .commands
            .remove_command_if(&self.name, self.id);
        tracing::debug!(name = %self.name, id = %self.id, removed, "released command");
    }
}

impl Drop for CommandInner {
    fn drop(&mut self) {
        if self.state.get_mut().destroyed {
            return;
        }
        let runtime = self.runtime.clone();
        let guard = runtime.token.acquire();
        self.release(&guard);
    }
}

/// Managed handle to a foreign command.
#[derive(Clone)]
pub struct Command {
    pub(crate) inner: Arc<CommandInner>,
}

impl Command {
    pub(crate) fn from_inner(inner: Arc<CommandInner>) -> Self {
        Self { inner }
    }

    /// Wrap the command currently registered as `name`.
    pub fn find(runtime: &Runtime, name: &str) -> BridgeResult<Command> {
        let shared = &runtime.shared;
        let mut guard = shared.token.acquire();
        let (info, existing) = loop {
            let info = shared
                .native
                .commands
                .find_command(name)
                .ok_or_else(|| BridgeError::NotFound(format!("command '{name}'")))?;
            let (existing, pending) = {
                let registry = shared.commands.borrow(&guard);
                (registry.find_or_none(&info.id), registry.is_pending(&info.id))
            };
            if !pending {
                break (info, existing);
            }
            // A released handle may still remove this command; look again
            // once it is done.
            shared.token.allow_threads(&mut guard, std::thread::yield_now);
        };
        if let Some(existing) = existing {
            return Ok(Command::from_inner(existing));
        }
        Ok(Self::register(
            shared,
            &guard,
            info.id,
            info.name,
            info.args_help,
            CommandOrigin::Native,
            None,
        ))
    }

    /// Register `function` as the command `name`.
    ///
    /// An existing command of the same name is replaced; its handle, if any,
    /// loses its keep-alive reference.
    pub fn create(
        runtime: &Runtime,
        name: &str,
        function: ScriptFunction,
        args_help: Option<String>,
        keep_alive: bool,
    ) -> BridgeResult<Command> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(BridgeError::TypeMismatch {
                message: format!("invalid command name '{name}'"),
            });
        }
        let shared = &runtime.shared;
        let guard = shared.token.acquire();
        let (id, replaced) = shared.native.commands.insert_command(
            name,
            args_help.clone(),
            trampoline::invocation(shared),
        );

        if let Some(replaced) = replaced {
            tracing::warn!(name, old = %replaced, new = %id, "overriding existing command");
            let displaced = shared.commands.borrow(&guard).find_or_none(&replaced);
            if let Some(displaced) = displaced {
                Command::from_inner(displaced).set_keep_alive(false)?;
            }
        }

        let command = Self::register(
            shared,
            &guard,
            id,
            name.to_string(),
            args_help,
            CommandOrigin::Script,
            Some(function),
        );
        if keep_alive {
            command.set_keep_alive(true)?;
        }
        Ok(command)
    }

    fn register(
        shared: &Arc<RuntimeShared>,
        guard: &TokenGuard<'_>,
        id: CommandId,
        name: String,
        args_help: Option<String>,
        origin: CommandOrigin,
        function: Option<ScriptFunction>,
    ) -> Command {
        let inner = Arc::new(CommandInner {
            runtime: shared.clone(),
            id,
            name,
            args_help,
            origin,
            state: TokenCell::new(CommandState {
                function,
                keep_alive: None,
                destroyed: false,
            }),
        });
        shared.commands.borrow_mut(guard).insert(id, &inner);
        tracing::debug!(name = %inner.name, %id, ?origin, "bridged command");
        Command { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> CommandId {
        self.inner.id
    }

    pub fn args_help(&self) -> Option<&str> {
        self.inner.args_help.as_deref()
    }

    pub fn origin(&self) -> CommandOrigin {
        self.inner.origin
    }

    pub fn function(&self) -> Option<ScriptFunction> {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).function.clone()
    }

    /// Swap the script function behind a script command. Invocations
    /// after this call run `function`; with `None` they fail as not found.
    pub fn set_function(&self, function: Option<ScriptFunction>) -> BridgeResult<()> {
        if self.inner.origin == CommandOrigin::Native {
            return Err(BridgeError::TypeMismatch {
                message: format!("'{}' is a native command without a script function", self.inner.name),
            });
        }
        let guard = self.inner.runtime.token.acquire();
        let previous = {
            let mut state = self.inner.state.borrow_mut(&guard);
            if state.destroyed {
                return Err(BridgeError::HandleDestroyed {
                    name: self.inner.name.clone(),
                });
            }
            std::mem::replace(&mut state.function, function)
        };
        drop(previous);
        tracing::debug!(name = %self.inner.name, "replaced command function");
        Ok(())
    }

    /// One-line usage: the declared argument help, else the function's
    /// parameter list.
    pub fn usage(&self) -> String {
        if let Some(args_help) = &self.inner.args_help {
            return format!("{} {args_help}", self.inner.name);
        }
        match self.function() {
            Some(function) => {
                let usage = function.usage();
                match usage.split_once(' ') {
                    Some((_, params)) => format!("{} {params}", self.inner.name),
                    None => self.inner.name.clone(),
                }
            }
            None => self.inner.name.clone(),
        }
    }

    pub fn same_handle(&self, other: &Command) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn state(&self) -> OwnershipState {
        let guard = self.inner.runtime.token.acquire();
        let state = self.inner.state.borrow(&guard);
        handle_state(state.destroyed, state.keep_alive.is_some())
    }

    pub fn keep_alive(&self) -> bool {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).keep_alive.is_some()
    }

    pub fn set_keep_alive(&self, keep_alive: bool) -> BridgeResult<()> {
        let guard = self.inner.runtime.token.acquire();
        let released = {
            let mut state = self.inner.state.borrow_mut(&guard);
            if state.destroyed {
                if keep_alive {
                    return Err(BridgeError::HandleDestroyed {
                        name: self.inner.name.clone(),
                    });
                }
                return Ok(());
            }
            match (keep_alive, state.keep_alive.is_some()) {
                (true, false) => {
                    state.keep_alive = Some(self.inner.clone());
                    None
                }
                (false, true) => state.keep_alive.take(),
                _ => return Ok(()),
            }
        };
        drop(released);
        tracing::debug!(name = %self.inner.name, keep_alive, "keep-alive changed");
        Ok(())
    }

    /// Destroy the handle now. A script command is removed from the list.
    pub fn forget(&self) {
        let guard = self.inner.runtime.token.acquire();
        let keep_alive = {
            let mut state = self.inner.state.borrow_mut(&guard);
            if state.destroyed {
                return;
            }
            state.keep_alive.take()
        };
        self.inner.release(&guard);
        drop(keep_alive);
    }

    /// Run the command through the command subsystem.
    ///
    /// Keyword arguments come first as `--key=value`, then positionals.
    /// A native command takes a true flag as a bare `--key` and drops a
    /// false one.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn invoke(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> BridgeResult<()> {
        let line = self.command_line(&args, &kwargs)?;
        let runtime = &self.inner.runtime;
        let mut guard = runtime.token.acquire();
        if self.inner.state.borrow(&guard).destroyed {
            return Err(BridgeError::HandleDestroyed {
                name: self.inner.name.clone(),
            });
        }

        tracing::trace!(name = %self.inner.name, %line, "invoking command");
        let commands = runtime.native.commands.clone();
        let result = runtime.token.allow_threads(&mut guard, || commands.execute(&line));
        let status = runtime.finish(&guard, result)?;
        if !status.is_success() {
            return Err(BridgeError::CommandFailed {
                name: self.inner.name.clone(),
                status,
            });
        }
        Ok(())
    }

    fn command_line(&self, args: &[Value], kwargs: &[(String, Value)]) -> BridgeResult<String> {
        let mut line = self.inner.name.clone();
        for (key, value) in kwargs {
            match value {
                Value::Bool(true) if self.inner.origin == CommandOrigin::Native => {
                    line.push_str(&format!(" --{key}"));
                }
                Value::Bool(false) if self.inner.origin == CommandOrigin::Native => {}
                _ => line.push_str(&format!(" --{key}={}", command_word(value)?)),
            }
        }
        for value in args {
            line.push(' ');
            line.push_str(&command_word(value)?);
        }
        Ok(line)
    }
}

/// Format one argument. Command lines are split on whitespace and carry
/// only scalars.
fn command_word(value: &Value) -> BridgeResult<String> {
    match value {
        Value::List(_) | Value::Parameter(_) | Value::Command(_) | Value::None => {
            Err(BridgeError::TypeMismatch {
                message: format!("cannot pass {} as a command argument", value.type_name()),
            })
        }
        Value::Str(s) if s.is_empty() || s.contains(char::is_whitespace) => {
            Err(BridgeError::TypeMismatch {
                message: format!("command argument {s:?} must be a single non-empty word"),
            })
        }
        other => Ok(other.to_string()),
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl Eq for Command {}
