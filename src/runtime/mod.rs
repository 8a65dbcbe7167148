//! Managed runtime.
//!
//! A [`Runtime`] owns the execution token, the identity registries and the
//! connection to the foreign subsystem. It is created explicitly and torn
//! down with [`Runtime::shutdown`]; there is no ambient global state.
//! Callbacks installed on native records hold only a weak reference to the
//! runtime, so records that outlive it fire into a no-op.

mod function;
mod token;
mod value;

use std::collections::hash_map::Entry;
use std::sync::Arc;

use parambridge_native::{
    CommandId, CommandList, CommandStore, LoopbackLink, ParamList, RecordId, RecordStore,
    RemoteLink,
};
use rustc_hash::FxHashMap;

use crate::bridge::OwnershipState;
use crate::bridge::registry::Registry;
use crate::command::{Command, CommandInner};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::parameter::{ParamInner, Parameter};

pub use function::{CallFrame, ParamSpec, ScriptCallable, ScriptFunction, TypeHint};
pub use token::{ExecutionToken, TokenGuard};
pub(crate) use token::{TokenCell, current_thread_tag};
pub use value::{FromValue, IntoValue, Value};

/// The foreign collaborators a runtime talks to.
#[derive(Clone)]
pub struct NativeSubsystem {
    pub records: Arc<dyn RecordStore>,
    pub commands: Arc<dyn CommandStore>,
    pub link: Arc<dyn RemoteLink>,
}

impl NativeSubsystem {
    pub fn new(
        records: Arc<dyn RecordStore>,
        commands: Arc<dyn CommandStore>,
        link: Arc<dyn RemoteLink>,
    ) -> Self {
        Self {
            records,
            commands,
            link,
        }
    }

    /// Fresh in-process lists and a loopback link.
    pub fn in_process() -> Self {
        Self::new(
            Arc::new(ParamList::new()),
            Arc::new(CommandList::new()),
            Arc::new(LoopbackLink::new()),
        )
    }
}

pub(crate) struct RuntimeShared {
    pub(crate) token: ExecutionToken,
    pub(crate) config: BridgeConfig,
    pub(crate) native: NativeSubsystem,
    pub(crate) parameters: TokenCell<Registry<RecordId, ParamInner>>,
    pub(crate) commands: TokenCell<Registry<CommandId, CommandInner>>,
    /// Callback errors waiting for the scripting call that triggered them,
    /// keyed by thread.
    pending_errors: TokenCell<FxHashMap<usize, BridgeError>>,
}

impl RuntimeShared {
    /// Route an error raised by dispatched user code.
    ///
    /// `scripted` is whether the dispatching thread was inside a scripting
    /// call when the native event arrived. Such errors are kept for that
    /// call to re-raise; anything else has no caller and is logged.
    pub(crate) fn contain_error(
        &self,
        guard: &TokenGuard<'_>,
        scripted: bool,
        origin: &str,
        error: BridgeError,
    ) {
        if scripted {
            let mut pending = self.pending_errors.borrow_mut(guard);
            match pending.entry(current_thread_tag()) {
                Entry::Occupied(first) => {
                    tracing::warn!(origin, %error, first = %first.get(), "dropping additional callback error");
                }
                Entry::Vacant(slot) => {
                    slot.insert(error);
                }
            }
        } else {
            tracing::error!(origin, %error, "error in callback dispatched from a native thread");
        }
    }

    /// Re-raise a callback error kept for the current thread.
    pub(crate) fn take_pending(&self, guard: &TokenGuard<'_>) -> BridgeResult<()> {
        let error = self
            .pending_errors
            .borrow_mut(guard)
            .remove(&current_thread_tag());
        match error {
            Some(error) => Err(BridgeError::propagated(error)),
            None => Ok(()),
        }
    }

    /// Finish a native call made on behalf of scripting code.
    ///
    /// A callback error raised during the call takes precedence over the
    /// call's own result.
    pub(crate) fn finish<T>(
        &self,
        guard: &TokenGuard<'_>,
        result: Result<T, parambridge_native::NativeError>,
    ) -> BridgeResult<T> {
        self.take_pending(guard)?;
        Ok(result?)
    }
}

/// Handle to a managed runtime. Cloning shares it.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Arc<RuntimeShared>,
}

impl Runtime {
    pub fn new(native: NativeSubsystem, config: BridgeConfig) -> Self {
        tracing::debug!(?config, "creating runtime");
        Self {
            shared: Arc::new(RuntimeShared {
                token: ExecutionToken::new(),
                config,
                native,
                parameters: TokenCell::new(Registry::new()),
                commands: TokenCell::new(Registry::new()),
                pending_errors: TokenCell::new(FxHashMap::default()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn token(&self) -> &ExecutionToken {
        &self.shared.token
    }

    pub fn native(&self) -> &NativeSubsystem {
        &self.shared.native
    }

    /// Registry lookup by parameter identity. Never creates a handle.
    pub fn find_or_none(&self, id: u16, node: u16) -> Option<Parameter> {
        let record = self.shared.native.records.find_record(id, node)?;
        self.find_record_handle(record)
    }

    /// Registry lookup by record.
    pub fn find_record_handle(&self, record: RecordId) -> Option<Parameter> {
        let guard = self.shared.token.acquire();
        let inner = self.shared.parameters.borrow(&guard).find_or_none(&record);
        inner.map(Parameter::from_inner)
    }

    /// Ownership state of a record.
    pub fn record_state(&self, record: RecordId) -> OwnershipState {
        match self.find_record_handle(record) {
            Some(handle) => handle.state(),
            None if self.shared.native.records.is_allocated(record) => OwnershipState::NativeOnly,
            None => OwnershipState::Destroyed,
        }
    }

    /// Number of live parameter handles.
    pub fn bridged_parameters(&self) -> usize {
        let guard = self.shared.token.acquire();
        self.shared.parameters.borrow(&guard).live_len()
    }

    /// Number of live command handles.
    pub fn bridged_commands(&self) -> usize {
        let guard = self.shared.token.acquire();
        self.shared.commands.borrow(&guard).live_len()
    }

    /// Registry lookup by command name.
    pub fn find_command_handle(&self, name: &str) -> Option<Command> {
        let info = self.shared.native.commands.find_command(name)?;
        let guard = self.shared.token.acquire();
        let inner = self.shared.commands.borrow(&guard).find_or_none(&info.id);
        inner.map(Command::from_inner)
    }

    /// Release every keep-alive reference and drop pending errors.
    ///
    /// Handles still referenced elsewhere survive; everything else is
    /// destroyed here.
    pub fn shutdown(&self) {
        let guard = self.shared.token.acquire();
        let parameters = self.shared.parameters.borrow(&guard).live_handles();
        let commands = self.shared.commands.borrow(&guard).live_handles();
        tracing::debug!(
            parameters = parameters.len(),
            commands = commands.len(),
            "shutting down runtime"
        );
        for inner in parameters {
            let _ = Parameter::from_inner(inner).set_keep_alive(false);
        }
        for inner in commands {
            let _ = Command::from_inner(inner).set_keep_alive(false);
        }
        self.shared.pending_errors.borrow_mut(&guard).clear();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.shared.config)
            .field("token", &self.shared.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contained_error_without_scripting_caller_is_cleared() {
        let runtime = Runtime::new(NativeSubsystem::in_process(), BridgeConfig::default());
        let guard = runtime.shared.token.acquire();
        runtime
            .shared
            .contain_error(&guard, false, "test", BridgeError::script("boom"));
        assert!(runtime.shared.take_pending(&guard).is_ok());
    }

    #[test]
    fn test_contained_error_for_scripting_caller_is_propagated() {
        let runtime = Runtime::new(NativeSubsystem::in_process(), BridgeConfig::default());
        let guard = runtime.shared.token.acquire();
        runtime
            .shared
            .contain_error(&guard, true, "test", BridgeError::script("first"));
        runtime
            .shared
            .contain_error(&guard, true, "test", BridgeError::script("second"));

        let err = runtime.shared.take_pending(&guard).unwrap_err();
        assert_eq!(err.root_cause().to_string(), "first");
        assert!(runtime.shared.take_pending(&guard).is_ok());
    }

    #[test]
    fn test_empty_runtime() {
        let runtime = Runtime::new(NativeSubsystem::in_process(), BridgeConfig::default());
        assert_eq!(runtime.bridged_parameters(), 0);
        assert!(runtime.find_or_none(1, 0).is_none());
        runtime.shutdown();
    }
}
