//! Refcounted scripting handles over foreign parameter and command records.
//!
//! The foreign subsystem owns its records outright: it links them into its
//! own lists, fires their callbacks from its own threads and frees them on
//! its own schedule. This crate gives a managed runtime safe handles to
//! those records.
//!
//! - [`bridge::registry`] keeps at most one live handle per record.
//! - [`bridge::ownership`] decides who frees a record when its handle dies.
//! - [`bridge::resolver`] picks the handle shape from the record's arity.
//! - The trampolines re-enter the runtime from foreign threads under the
//!   [`ExecutionToken`](runtime::ExecutionToken) and keep user errors from
//!   crossing the boundary.
//!
//! ```no_run
//! use parambridge::prelude::*;
//!
//! let runtime = Runtime::new(NativeSubsystem::in_process(), BridgeConfig::default());
//! let param = Parameter::create(&runtime, 5, "gain", ParamType::Uint8)
//!     .build()
//!     .unwrap();
//! param.set_value(Value::Int(3)).unwrap();
//! ```

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod parameter;
pub mod runtime;

pub use parambridge_native as native;

pub mod prelude {
    pub use crate::bridge::{HandleKind, OwnershipState};
    pub use crate::command::{Command, CommandOrigin};
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::parameter::{Parameter, ParameterBuilder, list_parameters};
    pub use crate::runtime::{
        CallFrame, ExecutionToken, FromValue, IntoValue, NativeSubsystem, ParamSpec, Runtime,
        ScriptFunction, TypeHint, Value,
    };
    pub use parambridge_native::{CommandStatus, ParamMask, ParamType, RecordId, RecordSpec};
}
