//! Cross-boundary callback trampolines.
//!
//! These closures are what the foreign subsystem actually calls. Each one:
//!
//! 1. notes whether the calling thread is inside a scripting call,
//! 2. acquires the execution token,
//! 3. finds the handle through the registry,
//! 4. marshals native data into [`Value`]s and calls the user function,
//! 5. contains any error (kept for the waiting scripting call, or logged),
//! 6. releases the token.
//!
//! Nothing raised by user code ever reaches the native caller.

use std::sync::{Arc, Weak};

use parambridge_native::{
    CommandEntry, CommandId, CommandStatus, ParamCallback, ParamValue, RecordId, StorageHooks,
};

use crate::bridge::args;
use crate::command::Command;
use crate::parameter::Parameter;
use crate::runtime::{RuntimeShared, Value};

/// Build the value-changed callback for a record.
///
/// `previous` is the callback the record carried before it was bridged; it
/// keeps firing first.
pub(crate) fn value_changed(
    runtime: &Arc<RuntimeShared>,
    previous: Option<ParamCallback>,
) -> ParamCallback {
    let runtime: Weak<RuntimeShared> = Arc::downgrade(runtime);
    Arc::new(move |record, offset| {
        if let Some(previous) = &previous {
            previous(record, offset);
        }
        if let Some(runtime) = runtime.upgrade() {
            dispatch_value_changed(&runtime, record, offset);
        }
    })
}

/// Deliver a value-changed event to the record's handle.
///
/// A record with no live handle is ignored: it may have been bridged and
/// forgotten since the event was raised.
#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn dispatch_value_changed(runtime: &RuntimeShared, record: RecordId, offset: i32) {
    let scripted = runtime.token.in_scripting_context();
    let guard = runtime.token.acquire();

    let inner = runtime.parameters.borrow(&guard).find_or_none(&record);
    let Some(inner) = inner else {
        tracing::trace!(%record, offset, "value changed on unbridged record");
        return;
    };
    let Some(callback) = inner.callback(&guard) else {
        return;
    };

    let param = Parameter::from_inner(inner);
    tracing::trace!(name = %param.name(), offset, "dispatching value-changed callback");
    let result = callback.call(
        vec![Value::Parameter(param), Value::Int(offset as i64)],
        Vec::new(),
    );
    if let Err(error) = result {
        runtime.contain_error(&guard, scripted, callback.name(), error);
    }
}

/// Build read/write hooks that route a record's storage through the
/// handle's getter and setter.
pub(crate) fn storage_hooks(runtime: &Arc<RuntimeShared>) -> StorageHooks {
    let reader: Weak<RuntimeShared> = Arc::downgrade(runtime);
    let writer = reader.clone();
    StorageHooks {
        read: Some(Arc::new(move |record, offset| {
            reader
                .upgrade()
                .and_then(|runtime| dispatch_get(&runtime, record, offset))
        })),
        write: Some(Arc::new(move |record, offset, value| {
            if let Some(runtime) = writer.upgrade() {
                dispatch_set(&runtime, record, offset, value);
            }
        })),
    }
}

/// Produce a value through the handle's getter. `None` falls back to the
/// cached value.
fn dispatch_get(runtime: &RuntimeShared, record: RecordId, offset: i32) -> Option<ParamValue> {
    let scripted = runtime.token.in_scripting_context();
    let guard = runtime.token.acquire();

    let inner = runtime.parameters.borrow(&guard).find_or_none(&record)?;
    let getter = inner.getter(&guard)?;
    let ty = inner.info().ty;
    let param = Parameter::from_inner(inner);

    let result = getter
        .call(
            vec![Value::Parameter(param), Value::Int(offset as i64)],
            Vec::new(),
        )
        .and_then(|value| value.to_param_value(ty));
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            runtime.contain_error(&guard, scripted, getter.name(), error);
            None
        }
    }
}

fn dispatch_set(runtime: &RuntimeShared, record: RecordId, offset: i32, value: &ParamValue) {
    let scripted = runtime.token.in_scripting_context();
    let guard = runtime.token.acquire();

    let inner = runtime.parameters.borrow(&guard).find_or_none(&record);
    let Some(inner) = inner else {
        return;
    };
    let Some(setter) = inner.setter(&guard) else {
        return;
    };
    let param = Parameter::from_inner(inner);

    let result = Value::from_param_value(value.clone()).and_then(|value| {
        setter.call(
            vec![Value::Parameter(param), Value::Int(offset as i64), value],
            Vec::new(),
        )
    });
    if let Err(error) = result {
        runtime.contain_error(&guard, scripted, setter.name(), error);
    }
}

/// Build the entry point installed for a script-backed command.
pub(crate) fn invocation(runtime: &Arc<RuntimeShared>) -> CommandEntry {
    let runtime: Weak<RuntimeShared> = Arc::downgrade(runtime);
    Arc::new(move |id, argv| match runtime.upgrade() {
        Some(runtime) => dispatch_invocation(&runtime, id, argv),
        None => CommandStatus::NotFound,
    })
}

/// Run a command's script function with marshaled arguments.
///
/// Unlike value-changed events, an invocation without a handle is an error:
/// a script-backed command always has one.
#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn dispatch_invocation(
    runtime: &RuntimeShared,
    id: CommandId,
    argv: &[String],
) -> CommandStatus {
    let scripted = runtime.token.in_scripting_context();
    let guard = runtime.token.acquire();

    let inner = runtime.commands.borrow(&guard).find_or_none(&id);
    let Some(inner) = inner else {
        tracing::error!(command = %id, "command invoked without a backing handle");
        return CommandStatus::NotFound;
    };
    let command = Command::from_inner(inner);
    let Some(function) = command.function() else {
        tracing::error!(name = command.name(), "command has no function");
        return CommandStatus::NotFound;
    };

    if args::wants_help(argv) {
        tracing::info!(target: "parambridge::command", "usage: {}", command.usage());
        if let Some(help) = function.help() {
            tracing::info!(target: "parambridge::command", "{help}");
        }
        return CommandStatus::Success;
    }

    let marshaled = args::tokenize(function.name(), argv).and_then(|raw| args::coerce(&function, raw));
    let (positional, keyword) = match marshaled {
        Ok(marshaled) => marshaled,
        Err(error) => {
            runtime.contain_error(&guard, scripted, function.name(), error);
            return CommandStatus::Invalid;
        }
    };

    tracing::trace!(name = command.name(), argc = argv.len(), "dispatching command");
    match function.call(positional, keyword) {
        Ok(_) => CommandStatus::Success,
        Err(error) => {
            runtime.contain_error(&guard, scripted, function.name(), error);
            CommandStatus::Invalid
        }
    }
}
