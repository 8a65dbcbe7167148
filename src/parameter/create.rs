//! Dynamic parameter creation and list membership.

use std::time::Duration;

use parambridge_native::{
    InsertStatus, NativeError, ParamMask, ParamType, Provenance, RecordId, RecordSpec, RecordStore,
};

use crate::bridge::signature::{CALLBACK_SIGNATURE, SETTER_SIGNATURE, validate_signature};
use crate::bridge::{HandleKind, resolve_handle_shape};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{Runtime, ScriptFunction};

use super::Parameter;
use super::handle::HandleOptions;

/// Builder for a record created through the bridge.
///
/// Nothing is allocated until [`build`](ParameterBuilder::build), and every
/// validation runs before the allocation.
#[must_use]
pub struct ParameterBuilder<'rt> {
    runtime: &'rt Runtime,
    spec: RecordSpec,
    node: Option<u16>,
    callback: Option<ScriptFunction>,
    getter: Option<ScriptFunction>,
    setter: Option<ScriptFunction>,
    host: Option<u16>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    paramver: Option<u8>,
    keep_alive: bool,
}

impl Parameter {
    /// Start building a dynamic parameter.
    pub fn create(
        runtime: &Runtime,
        id: u16,
        name: impl Into<String>,
        ty: ParamType,
    ) -> ParameterBuilder<'_> {
        ParameterBuilder {
            runtime,
            spec: RecordSpec::new(id, name, ty),
            node: None,
            callback: None,
            getter: None,
            setter: None,
            host: None,
            timeout: None,
            retries: None,
            paramver: None,
            keep_alive: false,
        }
    }

    /// Like [`create`](Parameter::create), with the type given by its
    /// native code. An unknown code is rejected before anything else.
    pub fn create_with_type_code(
        runtime: &Runtime,
        id: u16,
        name: impl Into<String>,
        code: u8,
    ) -> BridgeResult<ParameterBuilder<'_>> {
        Ok(Self::create(runtime, id, name, ParamType::from_code(code)?))
    }
}

impl<'rt> ParameterBuilder<'rt> {
    pub fn node(mut self, node: u16) -> Self {
        self.node = Some(node);
        self
    }

    pub fn arity(mut self, arity: usize) -> Self {
        self.spec = self.spec.arity(arity);
        self
    }

    pub fn mask(mut self, mask: ParamMask) -> Self {
        self.spec = self.spec.mask(mask);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.spec = self.spec.unit(unit);
        self
    }

    pub fn docstr(mut self, docstr: impl Into<String>) -> Self {
        self.spec = self.spec.docstr(docstr);
        self
    }

    pub fn callback(mut self, callback: ScriptFunction) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Produce values through `getter(param, offset)`.
    pub fn getter(mut self, getter: ScriptFunction) -> Self {
        self.getter = Some(getter);
        self
    }

    /// Receive writes through `setter(param, offset, value)`.
    pub fn setter(mut self, setter: ScriptFunction) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn host(mut self, host: u16) -> Self {
        self.host = Some(host);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn paramver(mut self, paramver: u8) -> Self {
        self.paramver = Some(paramver);
        self
    }

    /// Start in `BridgedKeepAlive` instead of `Bridged`.
    ///
    /// Off by default: a created parameter lives as long as its handles do,
    /// even though it stays linked into the list. Turn it on for a
    /// parameter that should outlive the code creating it.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Validate, allocate, bridge and link the record.
    pub fn build(self) -> BridgeResult<Parameter> {
        let shared = &self.runtime.shared;
        let config = &shared.config;
        let node = self.node.unwrap_or(config.default_node);
        let spec = self.spec.node(node);
        let records = &shared.native.records;

        let guard = shared.token.acquire();

        if let Some(existing) = records.find_record(spec.id, node) {
            let existing = records.describe(existing)?;
            return Err(BridgeError::DuplicateIdentity {
                message: format!(
                    "parameter with id {} already exists on node {node} (name {})",
                    spec.id, existing.name
                ),
            });
        }
        if records.find_by_name(&spec.name, node).is_some() {
            return Err(BridgeError::DuplicateIdentity {
                message: format!("parameter with name {} already exists on node {node}", spec.name),
            });
        }
        if let Some(callback) = &self.callback {
            validate_signature(callback, "callback", CALLBACK_SIGNATURE)?;
        }
        if let Some(getter) = &self.getter {
            validate_signature(getter, "getter", CALLBACK_SIGNATURE)?;
        }
        if let Some(setter) = &self.setter {
            validate_signature(setter, "setter", SETTER_SIGNATURE)?;
        }
        let requested = if self.getter.is_some() || self.setter.is_some() {
            HandleKind::GetSetParameter
        } else {
            HandleKind::DynamicParameter
        };
        let kind = resolve_handle_shape(requested, spec.arity)?;

        let spec_name = spec.name.clone();
        let record = records.create_record(spec)?;
        let info = match records.describe(record) {
            Ok(info) => info,
            Err(error) => {
                discard_record(records.as_ref(), record, &spec_name);
                return Err(error.into());
            }
        };
        let options = HandleOptions {
            host: self.host,
            timeout: self.timeout.unwrap_or_else(|| config.default_timeout()),
            retries: self.retries.unwrap_or(config.default_retries),
            paramver: self.paramver.unwrap_or(config.paramver),
            callback: self.callback,
            getter: self.getter,
            setter: self.setter,
        };
        let param = match Parameter::construct(shared, &guard, record, info, kind, options) {
            Ok(param) => param,
            Err(error) => {
                discard_record(records.as_ref(), record, &spec_name);
                return Err(error);
            }
        };

        // On failure the handle is dropped and frees the unlinked record.
        param.list_add(false)?;
        if self.keep_alive {
            param.set_keep_alive(true)?;
        }
        Ok(param)
    }
}

/// Free a record whose handle never came to be.
fn discard_record(records: &dyn RecordStore, record: RecordId, name: &str) {
    if let Err(error) = records.free_record(record) {
        tracing::error!(name, %record, %error, "failed to free unbridged parameter record");
    }
}

impl Parameter {
    /// Link this record into the foreign list.
    ///
    /// With `replace`, a different record with the same identity is
    /// unlinked first. A displaced record with a live handle stays alive
    /// and is freed when that handle goes; an unbridged dynamic one is
    /// freed now; a static one is left to its owner.
    pub fn list_add(&self, replace: bool) -> BridgeResult<()> {
        let shared = &self.inner.runtime;
        let guard = shared.token.acquire();
        self.inner.check_live(&guard)?;
        let records = &shared.native.records;

        let status = records.list_insert(self.record(), replace).map_err(|error| match error {
            NativeError::AlreadyListed { id, node, name } => BridgeError::DuplicateIdentity {
                message: format!("parameter with id {id} on node {node} is already listed (with name {name})"),
            },
            other => other.into(),
        })?;

        if let InsertStatus::Replaced(displaced) = status {
            let bridged = shared.parameters.borrow(&guard).find_or_none(&displaced);
            match bridged {
                Some(handle) => {
                    tracing::warn!(
                        name = %handle.info().name,
                        "replaced bridged parameter, it is freed with its handle"
                    );
                }
                None if records.describe(displaced)?.provenance == Provenance::Dynamic => {
                    records.free_record(displaced)?;
                }
                None => {}
            }
        }

        let message = "added parameter to list";
        if shared.config.verbose {
            tracing::info!(name = self.name(), id = self.id(), node = self.node(), "{message}");
        } else {
            tracing::debug!(name = self.name(), id = self.id(), node = self.node(), "{message}");
        }
        Ok(())
    }

    /// Unlink this record from the foreign list without destroying the
    /// handle. A dynamic record is then freed by the handle.
    pub fn list_forget(&self) -> BridgeResult<()> {
        let shared = &self.inner.runtime;
        let guard = shared.token.acquire();
        self.inner.check_live(&guard)?;
        shared.native.records.list_remove(self.record(), false)?;
        tracing::debug!(name = self.name(), "removed parameter from list");
        Ok(())
    }
}

/// Bridge every listed record, optionally only those on `node`.
///
/// Handles created here are kept alive only by the returned vector.
pub fn list_parameters(runtime: &Runtime, node: Option<u16>) -> BridgeResult<Vec<Parameter>> {
    let shared = &runtime.shared;
    let records = &shared.native.records;
    let mut guard = shared.token.acquire();
    let mut params = Vec::new();
    for record in records.list_iterate() {
        if let Some(node) = node
            && records.describe(record)?.node != node
        {
            continue;
        }
        params.push(Parameter::bridge(shared, &mut guard, record, HandleKind::Parameter)?);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parambridge_native::{
        CommandList, LoopbackLink, NativeParam, NativeResult, ParamCallback, ParamList,
        ParamValue, StorageHooks,
    };

    use super::*;
    use crate::config::BridgeConfig;
    use crate::runtime::NativeSubsystem;

    /// A parameter list that refuses to install callbacks.
    struct NoCallbacks(Arc<ParamList>);

    impl RecordStore for NoCallbacks {
        fn find_record(&self, id: u16, node: u16) -> Option<RecordId> {
            self.0.find_record(id, node)
        }
        fn find_by_name(&self, name: &str, node: u16) -> Option<RecordId> {
            self.0.find_by_name(name, node)
        }
        fn create_record(&self, spec: RecordSpec) -> NativeResult<RecordId> {
            self.0.create_record(spec)
        }
        fn list_insert(&self, record: RecordId, replace: bool) -> NativeResult<InsertStatus> {
            self.0.list_insert(record, replace)
        }
        fn list_remove(&self, record: RecordId, free_memory: bool) -> NativeResult<()> {
            self.0.list_remove(record, free_memory)
        }
        fn list_iterate(&self) -> Vec<RecordId> {
            self.0.list_iterate()
        }
        fn is_listed(&self, record: RecordId) -> bool {
            self.0.is_listed(record)
        }
        fn is_allocated(&self, record: RecordId) -> bool {
            self.0.is_allocated(record)
        }
        fn free_record(&self, record: RecordId) -> NativeResult<()> {
            self.0.free_record(record)
        }
        fn describe(&self, record: RecordId) -> NativeResult<NativeParam> {
            self.0.describe(record)
        }
        fn set_callback(
            &self,
            record: RecordId,
            _callback: Option<ParamCallback>,
        ) -> NativeResult<Option<ParamCallback>> {
            Err(NativeError::StaleRecord(record))
        }
        fn set_storage_hooks(
            &self,
            record: RecordId,
            hooks: StorageHooks,
        ) -> NativeResult<StorageHooks> {
            self.0.set_storage_hooks(record, hooks)
        }
        fn get_value(&self, record: RecordId, offset: i32) -> NativeResult<ParamValue> {
            self.0.get_value(record, offset)
        }
        fn set_value(&self, record: RecordId, offset: i32, value: ParamValue) -> NativeResult<()> {
            self.0.set_value(record, offset, value)
        }
    }

    #[test]
    fn test_failed_bridge_frees_new_record() {
        let params = Arc::new(ParamList::new());
        let native = NativeSubsystem::new(
            Arc::new(NoCallbacks(params.clone())),
            Arc::new(CommandList::new()),
            Arc::new(LoopbackLink::new()),
        );
        let runtime = Runtime::new(native, BridgeConfig::default());

        let result = Parameter::create(&runtime, 1, "orphan", ParamType::Int32).build();
        assert!(matches!(result, Err(BridgeError::Native(NativeError::StaleRecord(_)))));

        let stats = params.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.freed, 1);
        assert_eq!(stats.live, 0);
        assert_eq!(runtime.bridged_parameters(), 0);
    }
}
