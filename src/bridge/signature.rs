//! Callback signature validation.
//!
//! Runs before a function is attached to any record, so a rejected
//! function never becomes reachable from the trampoline.

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{ScriptFunction, TypeHint};

/// Value-changed callbacks and getters: `(param: Parameter, offset: int)`.
pub const CALLBACK_SIGNATURE: &[Option<TypeHint>] =
    &[Some(TypeHint::Parameter), Some(TypeHint::Int)];

/// Setters: `(param: Parameter, offset: int, value)`.
pub const SETTER_SIGNATURE: &[Option<TypeHint>] =
    &[Some(TypeHint::Parameter), Some(TypeHint::Int), None];

/// Check that `function` declares exactly `expected.len()` parameters of the
/// expected types.
///
/// Defaults do not relax the count. Missing hints are accepted.
pub fn validate_signature(
    function: &ScriptFunction,
    role: &str,
    expected: &[Option<TypeHint>],
) -> BridgeResult<()> {
    let arity = expected.len();
    let params = function.params();
    if params.len() != arity {
        return Err(BridgeError::InvalidCallbackSignature {
            message: format!(
                "{role} '{}' must take exactly {arity} arguments, it declares {}",
                function.name(),
                params.len()
            ),
        });
    }
    for (index, (param, expected)) in params.iter().zip(expected).enumerate() {
        if let (Some(declared), Some(expected)) = (param.hint, expected)
            && declared != *expected
        {
            return Err(BridgeError::InvalidCallbackSignature {
                message: format!(
                    "argument {index} ('{}') of {role} '{}' should be hinted as {}, not {}",
                    param.name,
                    function.name(),
                    expected.name(),
                    declared.name()
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ParamSpec, Value};

    fn function(params: Vec<ParamSpec>) -> ScriptFunction {
        params
            .into_iter()
            .fold(ScriptFunction::new("cb", |_| Ok(Value::None)), |f, p| {
                f.with_param(p)
            })
    }

    #[test]
    fn test_two_positional_accepted() {
        let f = function(vec![
            ParamSpec::hinted("param", TypeHint::Parameter),
            ParamSpec::hinted("offset", TypeHint::Int),
        ]);
        assert!(validate_signature(&f, "callback", CALLBACK_SIGNATURE).is_ok());

        let unhinted = function(vec![ParamSpec::new("p"), ParamSpec::new("o")]);
        assert!(validate_signature(&unhinted, "callback", CALLBACK_SIGNATURE).is_ok());
    }

    #[test]
    fn test_one_positional_rejected() {
        let f = function(vec![ParamSpec::new("param")]);
        assert!(matches!(
            validate_signature(&f, "callback", CALLBACK_SIGNATURE),
            Err(BridgeError::InvalidCallbackSignature { .. })
        ));
    }

    #[test]
    fn test_three_required_rejected() {
        let f = function(vec![
            ParamSpec::new("a"),
            ParamSpec::new("b"),
            ParamSpec::new("c"),
        ]);
        assert!(validate_signature(&f, "callback", CALLBACK_SIGNATURE).is_err());
    }

    #[test]
    fn test_third_with_default_rejected() {
        let f = function(vec![
            ParamSpec::new("a"),
            ParamSpec::new("b"),
            ParamSpec::new("c").default_value(1i64),
        ]);
        let err = validate_signature(&f, "callback", CALLBACK_SIGNATURE).unwrap_err();
        assert!(err.to_string().contains("exactly 2 arguments"));
    }

    #[test]
    fn test_setter_with_optional_value_rejected() {
        let f = function(vec![
            ParamSpec::new("param"),
            ParamSpec::new("offset"),
            ParamSpec::new("value"),
            ParamSpec::new("extra").default_value(0i64),
        ]);
        assert!(validate_signature(&f, "setter", SETTER_SIGNATURE).is_err());
    }

    #[test]
    fn test_wrong_hint_rejected() {
        let f = function(vec![
            ParamSpec::hinted("param", TypeHint::Parameter),
            ParamSpec::hinted("offset", TypeHint::Str),
        ]);
        let err = validate_signature(&f, "callback", CALLBACK_SIGNATURE).unwrap_err();
        assert!(err.to_string().contains("should be hinted as int"));
    }

    #[test]
    fn test_setter_takes_three() {
        let f = function(vec![
            ParamSpec::new("param"),
            ParamSpec::new("offset"),
            ParamSpec::new("value"),
        ]);
        assert!(validate_signature(&f, "setter", SETTER_SIGNATURE).is_ok());
        assert!(validate_signature(&f, "getter", CALLBACK_SIGNATURE).is_err());
    }
}
