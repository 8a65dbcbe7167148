//! Native parameter and command lists.
//!
//! This crate models the foreign subsystem that owns parameter records and
//! slash-style commands. Records live in a generational arena and are linked
//! into an intrusive-style list; neither the arena nor the list knows anything
//! about managed reference counting. The `parambridge` runtime consumes the
//! [`RecordStore`] and [`CommandStore`] interfaces exposed here.
//!
//! Every allocation and free is counted so tests can assert that records are
//! released exactly once.

pub mod arena;
pub mod command_list;
pub mod error;
pub mod param_list;
pub mod remote;
pub mod types;

pub use arena::{Arena, RecordId};
pub use command_list::{CommandEntry, CommandId, CommandInfo, CommandList, CommandStore};
pub use error::{NativeError, NativeResult};
pub use param_list::{
    InsertStatus, ListStats, NativeParam, ParamCallback, ParamList, ReadHook, RecordSpec,
    RecordStore, StorageHooks, WriteHook,
};
pub use remote::{LoopbackLink, RemoteLink};
pub use types::{CommandStatus, ParamMask, ParamType, ParamValue, Provenance};
