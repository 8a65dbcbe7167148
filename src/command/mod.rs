//! Command handles.
//!
//! A [`Command`] wraps an entry of the foreign command list. Commands found
//! by name are invoked by formatting a command line; commands created from a
//! [`ScriptFunction`](crate::runtime::ScriptFunction) are installed with the
//! invocation trampoline and removed again when their handle is destroyed.

mod handle;

pub(crate) use handle::CommandInner;
pub use handle::{Command, CommandOrigin};
