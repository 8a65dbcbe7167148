//! Parameter handles.
//!
//! A [`Parameter`] is the managed, reference-counted view of one native
//! record. Cloning a handle adds a strong reference; the handle is
//! destroyed when the last one is released, or early through
//! [`Parameter::forget`]. Destruction runs under the execution token, so it
//! never interleaves with a trampoline dispatch or another destruction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parambridge_native::{
    NativeParam, ParamCallback, ParamMask, ParamType, Provenance, RecordId, RecordStore,
    StorageHooks,
};

use crate::bridge::ownership::{Disposal, abort_on_violation, handle_state, plan_disposal};
use crate::bridge::registry::EntryOwner;
use crate::bridge::signature::{CALLBACK_SIGNATURE, SETTER_SIGNATURE, validate_signature};
use crate::bridge::trampoline;
use crate::bridge::{HandleKind, OwnershipState, resolve_handle_shape};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{Runtime, RuntimeShared, ScriptFunction, TokenCell, TokenGuard};

/// Per-handle settings supplied at construction.
pub(crate) struct HandleOptions {
    pub(crate) host: Option<u16>,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
    pub(crate) paramver: u8,
    pub(crate) callback: Option<ScriptFunction>,
    pub(crate) getter: Option<ScriptFunction>,
    pub(crate) setter: Option<ScriptFunction>,
}

impl HandleOptions {
    pub(crate) fn from_config(config: &BridgeConfig) -> Self {
        Self {
            host: None,
            timeout: config.default_timeout(),
            retries: config.default_retries,
            paramver: config.paramver,
            callback: None,
            getter: None,
            setter: None,
        }
    }
}

pub(crate) struct HandleState {
    pub(crate) host: Option<u16>,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
    pub(crate) paramver: u8,
    callback: Option<ScriptFunction>,
    getter: Option<ScriptFunction>,
    setter: Option<ScriptFunction>,
    keep_alive: Option<Arc<ParamInner>>,
    destroyed: bool,
    /// Native callback the record carried before it was bridged.
    previous_callback: Option<ParamCallback>,
}

pub(crate) struct ParamInner {
    pub(crate) runtime: Arc<RuntimeShared>,
    record: RecordId,
    kind: HandleKind,
    info: NativeParam,
    pub(crate) state: TokenCell<HandleState>,
}

impl ParamInner {
    pub(crate) fn info(&self) -> &NativeParam {
        &self.info
    }

    pub(crate) fn callback(&self, guard: &TokenGuard<'_>) -> Option<ScriptFunction> {
        self.state.borrow(guard).callback.clone()
    }

    pub(crate) fn getter(&self, guard: &TokenGuard<'_>) -> Option<ScriptFunction> {
        self.state.borrow(guard).getter.clone()
    }

    pub(crate) fn setter(&self, guard: &TokenGuard<'_>) -> Option<ScriptFunction> {
        self.state.borrow(guard).setter.clone()
    }

    fn records(&self) -> &Arc<dyn RecordStore> {
        &self.runtime.native.records
    }

    /// Fail on a destroyed handle; abort on a record freed underneath us.
    pub(crate) fn check_live(&self, guard: &TokenGuard<'_>) -> BridgeResult<()> {
        if self.state.borrow(guard).destroyed {
            return Err(BridgeError::HandleDestroyed {
                name: self.info.name.clone(),
            });
        }
        if !self.records().is_allocated(self.record) {
            abort_on_violation(
                crate::bridge::UseAfterFreeViolation {
                    record: self.record,
                },
                &self.info.name,
            );
        }
        Ok(())
    }

    /// Detach from the registry and dispose of the record.
    ///
    /// The caller takes the keep-alive reference beforehand.
    fn release_record(&self, guard: &TokenGuard<'_>) {
        let (previous, functions) = {
            let mut state = self.state.borrow_mut(guard);
            state.destroyed = true;
            (
                state.previous_callback.take(),
                [
                    state.callback.take(),
                    state.getter.take(),
                    state.setter.take(),
                ],
            )
        };
        // Functions may capture handles; release them outside the borrow.
        drop(functions);

        let owner = self
            .runtime
            .parameters
            .borrow_mut(guard)
            .remove(&self.record, self as *const ParamInner);
        if owner == EntryOwner::Other {
            tracing::debug!(name = %self.info.name, "record was re-bridged, leaving it in place");
            return;
        }

        let records = self.records();
        let disposal = match plan_disposal(
            self.record,
            self.info.provenance,
            records.is_listed(self.record),
            records.is_allocated(self.record),
        ) {
            Ok(disposal) => disposal,
            Err(violation) => abort_on_violation(violation, &self.info.name),
        };

        let result = match disposal {
            Disposal::ReleaseSlot => records.set_callback(self.record, previous).and_then(|_| {
                if self.kind == HandleKind::GetSetParameter {
                    records.set_storage_hooks(self.record, StorageHooks::default())?;
                }
                Ok(())
            }),
            Disposal::UnlinkAndFree => records.list_remove(self.record, true),
            Disposal::FreeUnlinked => records.free_record(self.record),
        };
        match result {
            Ok(()) => tracing::debug!(
                name = %self.info.name,
                record = %self.record,
                ?disposal,
                "released parameter record"
            ),
            Err(error) => tracing::error!(
                name = %self.info.name,
                record = %self.record,
                %error,
                "failed to release parameter record"
            ),
        }
    }
}

impl Drop for ParamInner {
    fn drop(&mut self) {
        if self.state.get_mut().destroyed {
            return;
        }
        let runtime = self.runtime.clone();
        let guard = runtime.token.acquire();
        self.release_record(&guard);
    }
}

/// Managed handle to a native parameter record.
#[derive(Clone)]
pub struct Parameter {
    pub(crate) inner: Arc<ParamInner>,
}

impl Parameter {
    pub(crate) fn from_inner(inner: Arc<ParamInner>) -> Self {
        Self { inner }
    }

    /// Bridge the listed record with `id` on `node` (default node if `None`).
    pub fn find(runtime: &Runtime, id: u16, node: Option<u16>) -> BridgeResult<Parameter> {
        let shared = &runtime.shared;
        let node = node.unwrap_or(shared.config.default_node);
        let mut guard = shared.token.acquire();
        let record = shared
            .native
            .records
            .find_record(id, node)
            .ok_or_else(|| BridgeError::NotFound(format!("id {id} on node {node}")))?;
        Self::bridge(shared, &mut guard, record, HandleKind::Parameter)
    }

    /// Bridge the listed record named `name`.
    pub fn find_by_name(runtime: &Runtime, name: &str, node: Option<u16>) -> BridgeResult<Parameter> {
        let shared = &runtime.shared;
        let node = node.unwrap_or(shared.config.default_node);
        let mut guard = shared.token.acquire();
        let record = shared
            .native
            .records
            .find_by_name(name, node)
            .ok_or_else(|| BridgeError::NotFound(format!("'{name}' on node {node}")))?;
        Self::bridge(shared, &mut guard, record, HandleKind::Parameter)
    }

    /// Bridge `record` as `requested`, or return its existing handle.
    pub fn from_record(
        runtime: &Runtime,
        record: RecordId,
        requested: HandleKind,
    ) -> BridgeResult<Parameter> {
        let shared = &runtime.shared;
        let mut guard = shared.token.acquire();
        Self::bridge(shared, &mut guard, record, requested)
    }

    pub(crate) fn bridge(
        shared: &Arc<RuntimeShared>,
        guard: &mut TokenGuard<'_>,
        record: RecordId,
        requested: HandleKind,
    ) -> BridgeResult<Parameter> {
        let existing = loop {
            let (existing, pending) = {
                let registry = shared.parameters.borrow(guard);
                (registry.find_or_none(&record), registry.is_pending(&record))
            };
            if !pending {
                break existing;
            }
            // The previous handle is waiting for the token to release the
            // record; let it finish before installing a new trampoline.
            shared.token.allow_threads(guard, std::thread::yield_now);
        };
        if let Some(existing) = existing {
            resolve_handle_shape(requested, existing.info.arity)?;
            return Ok(Parameter::from_inner(existing));
        }
        let info = shared.native.records.describe(record)?;
        let kind = resolve_handle_shape(requested, info.arity)?;
        Self::construct(
            shared,
            guard,
            record,
            info,
            kind,
            HandleOptions::from_config(&shared.config),
        )
    }

    /// Build a handle for an unbridged record: install the trampolines, then
    /// register. `NativeOnly → Bridged`.
    pub(crate) fn construct(
        shared: &Arc<RuntimeShared>,
        guard: &TokenGuard<'_>,
        record: RecordId,
        info: NativeParam,
        kind: HandleKind,
        options: HandleOptions,
    ) -> BridgeResult<Parameter> {
        let previous_callback = install_trampolines(shared, record, kind)?;
        let inner = Arc::new(ParamInner {
            runtime: shared.clone(),
            record,
            kind,
            info,
            state: TokenCell::new(HandleState {
                host: options.host,
                timeout: options.timeout,
                retries: options.retries,
                paramver: options.paramver,
                callback: options.callback,
                getter: options.getter,
                setter: options.setter,
                keep_alive: None,
                destroyed: false,
                previous_callback,
            }),
        });

        shared.parameters.borrow_mut(guard).insert(record, &inner);
        tracing::debug!(
            name = %inner.info.name,
            id = inner.info.id,
            node = inner.info.node,
            %kind,
            "bridged parameter"
        );
        Ok(Parameter { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn id(&self) -> u16 {
        self.inner.info.id
    }

    pub fn node(&self) -> u16 {
        self.inner.info.node
    }

    pub fn param_type(&self) -> ParamType {
        self.inner.info.ty
    }

    pub fn arity(&self) -> usize {
        self.inner.info.arity
    }

    pub fn mask(&self) -> ParamMask {
        self.inner.info.mask
    }

    pub fn unit(&self) -> Option<&str> {
        self.inner.info.unit.as_deref()
    }

    pub fn docstr(&self) -> Option<&str> {
        self.inner.info.docstr.as_deref()
    }

    pub fn provenance(&self) -> Provenance {
        self.inner.info.provenance
    }

    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    pub fn record(&self) -> RecordId {
        self.inner.record
    }

    /// Whether two handles are the same managed object.
    pub fn same_handle(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Strong references to this handle, including a keep-alive reference.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn state(&self) -> OwnershipState {
        let guard = self.inner.runtime.token.acquire();
        let state = self.inner.state.borrow(&guard);
        handle_state(state.destroyed, state.keep_alive.is_some())
    }

    pub fn is_list_member(&self) -> bool {
        self.inner.records().is_listed(self.inner.record)
    }

    pub fn keep_alive(&self) -> bool {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).keep_alive.is_some()
    }

    /// Hold (or drop) a strong reference from the handle to itself.
    ///
    /// Setting the current value again changes nothing.
    pub fn set_keep_alive(&self, keep_alive: bool) -> BridgeResult<()> {
        let guard = self.inner.runtime.token.acquire();
        let released = {
            let mut state = self.inner.state.borrow_mut(&guard);
            if state.destroyed {
                if keep_alive {
                    return Err(BridgeError::HandleDestroyed {
                        name: self.inner.info.name.clone(),
                    });
                }
                return Ok(());
            }
            match (keep_alive, state.keep_alive.is_some()) {
                (true, false) => {
                    state.keep_alive = Some(self.inner.clone());
                    None
                }
                (false, true) => state.keep_alive.take(),
                _ => return Ok(()),
            }
        };
        drop(released);
        tracing::debug!(name = %self.inner.info.name, keep_alive, "keep-alive changed");
        Ok(())
    }

    /// Destroy the handle now instead of at the last release.
    ///
    /// The registry entry is removed and the record is disposed of exactly
    /// as on a normal destruction. Later access fails with
    /// [`BridgeError::HandleDestroyed`]. Forgetting twice is a no-op.
    pub fn forget(&self) {
        let guard = self.inner.runtime.token.acquire();
        let keep_alive = {
            let mut state = self.inner.state.borrow_mut(&guard);
            if state.destroyed {
                return;
            }
            state.keep_alive.take()
        };
        self.inner.release_record(&guard);
        drop(keep_alive);
    }

    pub fn host(&self) -> Option<u16> {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).host
    }

    /// Route `value()` to a remote node. `None` reads the local cache.
    pub fn set_host(&self, host: Option<u16>) {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow_mut(&guard).host = host;
    }

    pub fn timeout(&self) -> Duration {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow_mut(&guard).timeout = timeout;
    }

    pub fn retries(&self) -> u32 {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).retries
    }

    pub fn set_retries(&self, retries: u32) {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow_mut(&guard).retries = retries;
    }

    pub fn paramver(&self) -> u8 {
        let guard = self.inner.runtime.token.acquire();
        self.inner.state.borrow(&guard).paramver
    }

    pub fn callback(&self) -> Option<ScriptFunction> {
        let guard = self.inner.runtime.token.acquire();
        self.inner.callback(&guard)
    }

    /// Replace the value-changed callback. The signature is checked first.
    pub fn set_callback(&self, callback: Option<ScriptFunction>) -> BridgeResult<()> {
        if let Some(callback) = &callback {
            validate_signature(callback, "callback", CALLBACK_SIGNATURE)?;
        }
        let guard = self.inner.runtime.token.acquire();
        self.inner.check_live(&guard)?;
        let previous = std::mem::replace(
            &mut self.inner.state.borrow_mut(&guard).callback,
            callback,
        );
        drop(previous);
        Ok(())
    }

    pub fn getter(&self) -> Option<ScriptFunction> {
        let guard = self.inner.runtime.token.acquire();
        self.inner.getter(&guard)
    }

    pub fn setter(&self) -> Option<ScriptFunction> {
        let guard = self.inner.runtime.token.acquire();
        self.inner.setter(&guard)
    }

    /// Replace the getter of a getter/setter parameter. The signature is
    /// checked before the swap.
    pub fn set_getter(&self, getter: Option<ScriptFunction>) -> BridgeResult<()> {
        if let Some(getter) = &getter {
            validate_signature(getter, "getter", CALLBACK_SIGNATURE)?;
        }
        self.replace_accessor(Accessor::Getter, getter)
    }

    /// Replace the setter of a getter/setter parameter. The signature is
    /// checked before the swap.
    pub fn set_setter(&self, setter: Option<ScriptFunction>) -> BridgeResult<()> {
        if let Some(setter) = &setter {
            validate_signature(setter, "setter", SETTER_SIGNATURE)?;
        }
        self.replace_accessor(Accessor::Setter, setter)
    }

    fn replace_accessor(
        &self,
        accessor: Accessor,
        function: Option<ScriptFunction>,
    ) -> BridgeResult<()> {
        let role = accessor.name();
        let guard = self.inner.runtime.token.acquire();
        self.inner.check_live(&guard)?;
        if self.inner.kind != HandleKind::GetSetParameter {
            return Err(BridgeError::TypeMismatch {
                message: format!(
                    "'{}' is a {}, only a {} has a {role}",
                    self.inner.info.name,
                    self.inner.kind,
                    HandleKind::GetSetParameter
                ),
            });
        }
        let previous = {
            let mut state = self.inner.state.borrow_mut(&guard);
            let state = &mut *state;
            let (slot, other) = match accessor {
                Accessor::Getter => (&mut state.getter, &state.setter),
                Accessor::Setter => (&mut state.setter, &state.getter),
            };
            // Storage hooks stay installed, so one of the two must remain.
            if function.is_none() && other.is_none() {
                return Err(BridgeError::TypeMismatch {
                    message: format!(
                        "'{}' cannot have neither a getter nor a setter",
                        self.inner.info.name
                    ),
                });
            }
            std::mem::replace(slot, function)
        };
        drop(previous);
        tracing::debug!(name = %self.inner.info.name, role, "replaced accessor");
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Accessor {
    Getter,
    Setter,
}

impl Accessor {
    fn name(self) -> &'static str {
        match self {
            Accessor::Getter => "getter",
            Accessor::Setter => "setter",
        }
    }
}

/// Install the value-changed trampoline, chaining the record's current
/// callback, and the storage hooks for getter/setter handles.
fn install_trampolines(
    shared: &Arc<RuntimeShared>,
    record: RecordId,
    kind: HandleKind,
) -> BridgeResult<Option<ParamCallback>> {
    let records = &shared.native.records;
    let previous = records.set_callback(record, None)?;
    records.set_callback(record, Some(trampoline::value_changed(shared, previous.clone())))?;
    if kind == HandleKind::GetSetParameter {
        records.set_storage_hooks(record, trampoline::storage_hooks(shared))?;
    }
    Ok(previous)
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.inner.info.name)
            .field("id", &self.inner.info.id)
            .field("node", &self.inner.info.node)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl Eq for Parameter {}
