//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parambridge::native::{CommandList, LoopbackLink, ParamList};
use parambridge::prelude::*;
use parking_lot::Mutex;

/// A runtime over in-process lists the test can also drive directly.
pub struct Harness {
    pub runtime: Runtime,
    pub params: Arc<ParamList>,
    pub commands: Arc<CommandList>,
    pub link: Arc<LoopbackLink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let params = Arc::new(ParamList::new());
        let commands = Arc::new(CommandList::new());
        let link = Arc::new(LoopbackLink::new());
        let native = NativeSubsystem::new(params.clone(), commands.clone(), link.clone());
        Self {
            runtime: Runtime::new(native, config),
            params,
            commands,
            link,
        }
    }
}

/// Calls seen by a recording callback, as `(parameter name, offset)`.
pub type Calls = Arc<Mutex<Vec<(String, i64)>>>;

/// A `(param, offset)` callback that records every call.
pub fn recording_callback(name: &str) -> (ScriptFunction, Calls) {
    let calls: Calls = Arc::default();
    let seen = calls.clone();
    let function = ScriptFunction::new(name, move |frame| {
        let param: Parameter = frame.arg(0)?;
        let offset: i64 = frame.arg(1)?;
        seen.lock().push((param.name().to_string(), offset));
        Ok(Value::None)
    })
    .with_param(ParamSpec::hinted("param", TypeHint::Parameter))
    .with_param(ParamSpec::hinted("offset", TypeHint::Int));
    (function, calls)
}

/// A `(param, offset)` callback that always fails with `message`.
pub fn failing_callback(message: &'static str) -> ScriptFunction {
    ScriptFunction::new("failing", move |_| Err(BridgeError::script(message)))
        .with_param(ParamSpec::new("param"))
        .with_param(ParamSpec::new("offset"))
}
