//! Command argument marshaling.
//!
//! A native argument vector is split into positional values and
//! `--name=value` keywords, then each text value is coerced to the hint the
//! target function declares for it.

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{ScriptFunction, TypeHint, Value};

/// Tokenized command arguments, still as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawArgs {
    pub positional: Vec<String>,
    pub keyword: Vec<(String, String)>,
}

/// True when the argument vector asks for usage.
pub fn wants_help(argv: &[String]) -> bool {
    argv.iter().any(|a| a == "-h" || a == "--help")
}

/// Split `argv` into positional and keyword arguments.
pub fn tokenize(function: &str, argv: &[String]) -> BridgeResult<RawArgs> {
    let mut args = RawArgs::default();
    for arg in argv {
        match arg.strip_prefix("--") {
            Some(keyword) => {
                let (name, value) =
                    keyword
                        .split_once('=')
                        .ok_or_else(|| BridgeError::ArgumentCoercion {
                            function: function.to_string(),
                            argument: keyword.to_string(),
                            value: arg.clone(),
                            reason: "invalid format for keyword argument, expected --name=value"
                                .to_string(),
                        })?;
                args.keyword.push((name.to_string(), value.to_string()));
            }
            None => args.positional.push(arg.clone()),
        }
    }
    Ok(args)
}

/// Coerce tokenized text to the function's declared types.
pub fn coerce(
    function: &ScriptFunction,
    raw: RawArgs,
) -> BridgeResult<(Vec<Value>, Vec<(String, Value)>)> {
    let params = function.params();
    let positional = raw
        .positional
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let (name, hint) = params
                .get(index)
                .map(|p| (p.name.clone(), p.hint))
                .unwrap_or_else(|| (index.to_string(), None));
            coerce_text(function.name(), &name, text, hint)
        })
        .collect::<BridgeResult<Vec<_>>>()?;

    let keyword = raw
        .keyword
        .into_iter()
        .map(|(name, text)| {
            let hint = params.iter().find(|p| p.name == name).and_then(|p| p.hint);
            coerce_text(function.name(), &name, text, hint).map(|value| (name, value))
        })
        .collect::<BridgeResult<Vec<_>>>()?;

    Ok((positional, keyword))
}

/// Convert one text argument according to `hint`. Unhinted text stays text.
pub fn coerce_text(
    function: &str,
    argument: &str,
    text: String,
    hint: Option<TypeHint>,
) -> BridgeResult<Value> {
    let fail = |reason: &str, text: &str| BridgeError::ArgumentCoercion {
        function: function.to_string(),
        argument: argument.to_string(),
        value: text.to_string(),
        reason: reason.to_string(),
    };
    match hint {
        Some(TypeHint::Int) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| trimmed.parse::<u64>().map(Value::UInt))
                .map_err(|_| fail("expected a base-10 integer", &text))
        }
        Some(TypeHint::Float) => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| fail("expected a floating point number", &text)),
        Some(TypeHint::Bool) => match text.to_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(fail("use either \"True\" or \"False\"", &text)),
        },
        Some(TypeHint::Bytes) => Ok(Value::Bytes(text.into_bytes())),
        Some(TypeHint::Str) | Some(TypeHint::Parameter) | None => Ok(Value::Str(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ParamSpec;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn target() -> ScriptFunction {
        ScriptFunction::new("configure", |_| Ok(Value::None))
            .with_param(ParamSpec::hinted("count", TypeHint::Int))
            .with_param(ParamSpec::hinted("ratio", TypeHint::Float))
            .with_param(ParamSpec::hinted("enabled", TypeHint::Bool).default_value(false))
            .with_param(ParamSpec::new("label").default_value("x"))
    }

    #[test]
    fn test_tokenize_splits_keywords() {
        let raw = tokenize("f", &argv(&["1", "--enabled=TRUE", "2.5"])).unwrap();
        assert_eq!(raw.positional, vec!["1", "2.5"]);
        assert_eq!(raw.keyword, vec![("enabled".to_string(), "TRUE".to_string())]);
    }

    #[test]
    fn test_bare_keyword_rejected() {
        let err = tokenize("f", &argv(&["--verbose"])).unwrap_err();
        assert!(matches!(err, BridgeError::ArgumentCoercion { argument, .. } if argument == "verbose"));
    }

    #[test]
    fn test_coerce_by_hint() {
        let raw = tokenize("configure", &argv(&["3", "0.25", "--enabled=True", "--label=abc"])).unwrap();
        let (args, kwargs) = coerce(&target(), raw).unwrap();
        assert_eq!(args, vec![Value::Int(3), Value::Float(0.25)]);
        assert_eq!(
            kwargs,
            vec![
                ("enabled".to_string(), Value::Bool(true)),
                ("label".to_string(), Value::Str("abc".into())),
            ]
        );
    }

    #[test]
    fn test_coercion_failure_names_argument() {
        let raw = tokenize("configure", &argv(&["three"])).unwrap();
        let err = coerce(&target(), raw).unwrap_err();
        match err {
            BridgeError::ArgumentCoercion {
                function, argument, ..
            } => {
                assert_eq!(function, "configure");
                assert_eq!(argument, "count");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bool_literals_only() {
        assert!(coerce_text("f", "b", "yes".into(), Some(TypeHint::Bool)).is_err());
        assert_eq!(
            coerce_text("f", "b", "fAlSe".into(), Some(TypeHint::Bool)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_int_hint_accepts_full_unsigned_range() {
        assert_eq!(
            coerce_text("f", "n", "18446744073709551615".into(), Some(TypeHint::Int)).unwrap(),
            Value::UInt(u64::MAX)
        );
        assert_eq!(
            coerce_text("f", "n", " -4 ".into(), Some(TypeHint::Int)).unwrap(),
            Value::Int(-4)
        );
        assert!(coerce_text("f", "n", "18446744073709551616".into(), Some(TypeHint::Int)).is_err());
    }

    #[test]
    fn test_help_detection() {
        assert!(wants_help(&argv(&["a", "-h"])));
        assert!(wants_help(&argv(&["--help"])));
        assert!(!wants_help(&argv(&["--helpme=1"])));
    }
}
