//! Value access for parameter handles.
//!
//! Cached access reads and writes the foreign list's local copy. Remote
//! access performs a blocking transaction through the
//! [`RemoteLink`](parambridge_native::RemoteLink); the execution token is
//! released for the duration of each attempt so value-changed callbacks
//! from other threads can still run.

use parambridge_native::{NativeResult, ParamValue};

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{TokenGuard, Value};

use super::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cached,
    Remote,
}

/// Resolve a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> BridgeResult<i32> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(BridgeError::IndexOutOfRange { index, len });
    }
    Ok(resolved as i32)
}

impl Parameter {
    /// Whole-array reads return a list.
    pub fn is_array(&self) -> bool {
        self.arity() > 1 && !self.param_type().is_buffer()
    }

    /// Remote value if a host is set, cached value otherwise.
    pub fn value(&self) -> BridgeResult<Value> {
        self.read(self.default_source(), None)
    }

    pub fn value_at(&self, index: i64) -> BridgeResult<Value> {
        self.read(self.default_source(), Some(index))
    }

    pub fn set_value(&self, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(self.default_source(), None, value.into())
    }

    pub fn set_value_at(&self, index: i64, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(self.default_source(), Some(index), value.into())
    }

    pub fn cached_value(&self) -> BridgeResult<Value> {
        self.read(Source::Cached, None)
    }

    pub fn cached_value_at(&self, index: i64) -> BridgeResult<Value> {
        self.read(Source::Cached, Some(index))
    }

    /// Write the local copy. The record's callback fires.
    pub fn set_cached_value(&self, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(Source::Cached, None, value.into())
    }

    pub fn set_cached_value_at(&self, index: i64, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(Source::Cached, Some(index), value.into())
    }

    pub fn remote_value(&self) -> BridgeResult<Value> {
        self.read(Source::Remote, None)
    }

    pub fn remote_value_at(&self, index: i64) -> BridgeResult<Value> {
        self.read(Source::Remote, Some(index))
    }

    pub fn set_remote_value(&self, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(Source::Remote, None, value.into())
    }

    pub fn set_remote_value_at(&self, index: i64, value: impl Into<Value>) -> BridgeResult<()> {
        self.write(Source::Remote, Some(index), value.into())
    }

    fn default_source(&self) -> Source {
        match self.host() {
            Some(_) => Source::Remote,
            None => Source::Cached,
        }
    }

    /// Native offsets addressed by an optional index.
    fn offsets(&self, index: Option<i64>) -> BridgeResult<Vec<i32>> {
        match index {
            Some(_) if self.param_type().is_buffer() => Err(BridgeError::TypeMismatch {
                message: format!("indexing a {} parameter is not supported", self.param_type()),
            }),
            Some(index) => Ok(vec![normalize_index(index, self.arity())?]),
            None if self.is_array() => Ok((0..self.arity() as i32).collect()),
            None => Ok(vec![-1]),
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn read(&self, source: Source, index: Option<i64>) -> BridgeResult<Value> {
        let runtime = &self.inner.runtime;
        let mut guard = runtime.token.acquire();
        self.inner.check_live(&guard)?;
        let offsets = self.offsets(index)?;

        if source == Source::Remote {
            for &offset in &offsets {
                self.pull(&mut guard, offset)?;
            }
        }

        let records = &runtime.native.records;
        let mut values = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let value = runtime.finish(&guard, records.get_value(self.record(), offset))?;
            values.push(Value::from_param_value(value)?);
        }

        if index.is_none() && self.is_array() {
            Ok(Value::List(values))
        } else {
            Ok(values.pop().unwrap_or_default())
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn write(&self, source: Source, index: Option<i64>, value: Value) -> BridgeResult<()> {
        let runtime = &self.inner.runtime;
        let mut guard = runtime.token.acquire();
        self.inner.check_live(&guard)?;
        let offsets = self.offsets(index)?;
        let ty = self.param_type();

        let items = match value {
            Value::List(items) if index.is_none() && self.is_array() => {
                if items.len() != offsets.len() {
                    return Err(BridgeError::TypeMismatch {
                        message: format!(
                            "expected {} values for '{}', got {}",
                            offsets.len(),
                            self.name(),
                            items.len()
                        ),
                    });
                }
                items
            }
            Value::List(_) => {
                return Err(BridgeError::TypeMismatch {
                    message: format!("cannot assign a list to a single value of '{}'", self.name()),
                });
            }
            _ if index.is_none() && self.is_array() => {
                return Err(BridgeError::TypeMismatch {
                    message: format!("'{}' is an array; assign a list or use an index", self.name()),
                });
            }
            single => vec![single],
        };

        // Convert everything before the first write.
        let native = offsets
            .into_iter()
            .zip(items)
            .map(|(offset, item)| item.to_param_value(ty).map(|value| (offset, value)))
            .collect::<BridgeResult<Vec<(i32, ParamValue)>>>()?;

        let records = runtime.native.records.clone();
        for (offset, value) in native {
            match source {
                Source::Cached => {
                    runtime.finish(&guard, records.set_value(self.record(), offset, value))?;
                }
                Source::Remote => self.push(&mut guard, offset, &value)?,
            }
        }
        Ok(())
    }

    fn pull(&self, guard: &mut TokenGuard<'_>, offset: i32) -> BridgeResult<()> {
        let records = self.inner.runtime.native.records.clone();
        let link = self.inner.runtime.native.link.clone();
        let record = self.record();
        self.exchange(guard, |node, timeout| {
            link.pull(records.as_ref(), record, offset, node, timeout)
        })
    }

    fn push(&self, guard: &mut TokenGuard<'_>, offset: i32, value: &ParamValue) -> BridgeResult<()> {
        let records = self.inner.runtime.native.records.clone();
        let link = self.inner.runtime.native.link.clone();
        let record = self.record();
        self.exchange(guard, |node, timeout| {
            link.push(records.as_ref(), record, offset, value, node, timeout)
        })
    }

    /// Run a remote transaction with the token released, retrying up to the
    /// handle's retry count.
    fn exchange(
        &self,
        guard: &mut TokenGuard<'_>,
        attempt: impl Fn(u16, std::time::Duration) -> NativeResult<bool>,
    ) -> BridgeResult<()> {
        let runtime = &self.inner.runtime;
        let (node, timeout, retries) = {
            let state = self.inner.state.borrow(guard);
            (state.host.unwrap_or(self.node()), state.timeout, state.retries.max(1))
        };

        for tries in 1..=retries {
            let answered = runtime.token.allow_threads(guard, || attempt(node, timeout));
            if runtime.finish(guard, answered)? {
                return Ok(());
            }
            tracing::debug!(name = self.name(), node, tries, "no response");
        }
        Err(BridgeError::NoResponse { node })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(0, 4).unwrap(), 0);
        assert_eq!(normalize_index(-1, 4).unwrap(), 3);
        assert_eq!(normalize_index(-4, 4).unwrap(), 0);
        assert!(matches!(
            normalize_index(4, 4),
            Err(BridgeError::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(normalize_index(-5, 4).is_err());
    }
}
