//! The native-record / managed-handle bridge.

pub mod args;
pub mod ownership;
pub mod registry;
pub mod resolver;
pub mod signature;
pub(crate) mod trampoline;

pub use ownership::{Disposal, OwnershipState, UseAfterFreeViolation, plan_disposal};
pub use registry::{EntryOwner, Registry};
pub use resolver::{HandleKind, resolve_handle_shape};
pub use signature::validate_signature;
