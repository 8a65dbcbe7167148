//! Script functions.
//!
//! A [`ScriptFunction`] is a managed callable with a declared parameter list.
//! Declarations carry optional type hints and defaults; the bridge inspects
//! them to validate callback signatures and to coerce command-line text.

use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};

use super::value::{FromValue, Value};

/// Declared type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeHint {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    Parameter,
}

impl TypeHint {
    pub fn name(self) -> &'static str {
        match self {
            TypeHint::Int => "int",
            TypeHint::Float => "float",
            TypeHint::Bool => "bool",
            TypeHint::Str => "str",
            TypeHint::Bytes => "bytes",
            TypeHint::Parameter => "Parameter",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub hint: Option<TypeHint>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: None,
            default: None,
        }
    }

    pub fn hinted(name: impl Into<String>, hint: TypeHint) -> Self {
        Self::new(name).hint(hint)
    }

    pub fn hint(mut self, hint: TypeHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Bound arguments of one call.
pub struct CallFrame {
    function: String,
    args: Vec<Value>,
}

impl CallFrame {
    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg_value(&self, index: usize) -> BridgeResult<&Value> {
        self.args.get(index).ok_or_else(|| BridgeError::TypeMismatch {
            message: format!(
                "{}() has no argument {index} (takes {})",
                self.function,
                self.args.len()
            ),
        })
    }

    /// Typed argument access.
    pub fn arg<T: FromValue>(&self, index: usize) -> BridgeResult<T> {
        T::from_value(self.arg_value(index)?)
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Body of a script function.
pub trait ScriptCallable {
    fn call(&self, frame: &mut CallFrame) -> BridgeResult<Value>;
}

impl<F> ScriptCallable for F
where
    F: Fn(&mut CallFrame) -> BridgeResult<Value>,
{
    fn call(&self, frame: &mut CallFrame) -> BridgeResult<Value> {
        self(frame)
    }
}

/// A named managed callable. Cloning shares the body.
#[derive(Clone)]
pub struct ScriptFunction {
    name: String,
    params: Vec<ParamSpec>,
    help: Option<String>,
    body: Arc<dyn ScriptCallable + Send + Sync>,
}

impl ScriptFunction {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut CallFrame) -> BridgeResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            help: None,
            body: Arc::new(body),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_required()).count()
    }

    pub fn same_body(&self, other: &ScriptFunction) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// One-line usage, e.g. `name <a:int> [b=3]`.
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for param in &self.params {
            let hint = param.hint.map(|h| format!(":{}", h.name())).unwrap_or_default();
            match &param.default {
                None => usage.push_str(&format!(" <{}{hint}>", param.name)),
                Some(default) => usage.push_str(&format!(" [{}{hint}={default}]", param.name)),
            }
        }
        usage
    }

    /// Bind positional and keyword arguments, fill defaults, and run the body.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> BridgeResult<Value> {
        let mut frame = CallFrame {
            function: self.name.clone(),
            args: self.bind(args, kwargs)?,
        };
        self.body.call(&mut frame)
    }

    fn bind(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> BridgeResult<Vec<Value>> {
        if args.len() > self.params.len() {
            return Err(BridgeError::TypeMismatch {
                message: format!(
                    "{}() takes {} positional arguments but {} were given",
                    self.name,
                    self.params.len(),
                    args.len()
                ),
            });
        }

        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(self.params.len(), None);

        for (key, value) in kwargs {
            let index = self
                .params
                .iter()
                .position(|p| p.name == key)
                .ok_or_else(|| BridgeError::TypeMismatch {
                    message: format!("{}() got an unexpected keyword argument '{key}'", self.name),
                })?;
            if slots[index].is_some() {
                return Err(BridgeError::TypeMismatch {
                    message: format!("{}() got multiple values for argument '{key}'", self.name),
                });
            }
            slots[index] = Some(value);
        }

        slots
            .into_iter()
            .zip(&self.params)
            .map(|(slot, param)| {
                slot.or_else(|| param.default.clone())
                    .ok_or_else(|| BridgeError::TypeMismatch {
                        message: format!(
                            "{}() missing required argument '{}'",
                            self.name, param.name
                        ),
                    })
            })
            .collect()
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
