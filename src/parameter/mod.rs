//! Parameter handles and their operations.

mod access;
mod create;
mod handle;

pub use create::{ParameterBuilder, list_parameters};
pub(crate) use handle::ParamInner;
pub use handle::Parameter;
