//! Handle shape resolution.
//!
//! The concrete handle kind is chosen once, at construction, from the
//! requested kind and the record's arity. Array variants come from a closed
//! table instead of a type-hierarchy search.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Parameter,
    ParameterArray,
    DynamicParameter,
    DynamicParameterArray,
    /// Values produced by managed getter/setter functions. Scalar only.
    GetSetParameter,
}

/// Scalar family → array-capable variant.
const ARRAY_VARIANTS: &[(HandleKind, HandleKind)] = &[
    (HandleKind::Parameter, HandleKind::ParameterArray),
    (HandleKind::DynamicParameter, HandleKind::DynamicParameterArray),
];

impl HandleKind {
    pub fn is_array(self) -> bool {
        matches!(
            self,
            HandleKind::ParameterArray | HandleKind::DynamicParameterArray
        )
    }

    /// Kinds created through the bridge rather than by lookup.
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            HandleKind::DynamicParameter
                | HandleKind::DynamicParameterArray
                | HandleKind::GetSetParameter
        )
    }

    pub fn array_variant(self) -> Option<HandleKind> {
        if self.is_array() {
            return Some(self);
        }
        ARRAY_VARIANTS
            .iter()
            .find(|(scalar, _)| *scalar == self)
            .map(|(_, array)| *array)
    }

    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Parameter => "Parameter",
            HandleKind::ParameterArray => "ParameterArray",
            HandleKind::DynamicParameter => "DynamicParameter",
            HandleKind::DynamicParameterArray => "DynamicParameterArray",
            HandleKind::GetSetParameter => "GetSetParameter",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the concrete kind for a record of `arity` elements.
pub fn resolve_handle_shape(requested: HandleKind, arity: usize) -> BridgeResult<HandleKind> {
    if arity <= 1 {
        if requested.is_array() {
            return Err(BridgeError::ShapeMismatch {
                message: format!("{requested} requires an array record, found arity {arity}"),
            });
        }
        return Ok(requested);
    }
    requested
        .array_variant()
        .ok_or_else(|| BridgeError::ShapeMismatch {
            message: format!("{requested} has no array variant for arity {arity}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_arity_keeps_requested() {
        assert_eq!(
            resolve_handle_shape(HandleKind::Parameter, 1).unwrap(),
            HandleKind::Parameter
        );
        assert_eq!(
            resolve_handle_shape(HandleKind::GetSetParameter, 0).unwrap(),
            HandleKind::GetSetParameter
        );
    }

    #[test]
    fn test_array_arity_selects_variant() {
        assert_eq!(
            resolve_handle_shape(HandleKind::Parameter, 5).unwrap(),
            HandleKind::ParameterArray
        );
        assert_eq!(
            resolve_handle_shape(HandleKind::DynamicParameter, 2).unwrap(),
            HandleKind::DynamicParameterArray
        );
        assert_eq!(
            resolve_handle_shape(HandleKind::ParameterArray, 3).unwrap(),
            HandleKind::ParameterArray
        );
    }

    #[test]
    fn test_scalar_only_kind_rejects_array() {
        let err = resolve_handle_shape(HandleKind::GetSetParameter, 5).unwrap_err();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_array_kind_rejects_scalar() {
        let err = resolve_handle_shape(HandleKind::ParameterArray, 1).unwrap_err();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
    }
}
