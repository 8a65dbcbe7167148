//! The foreign parameter list.
//!
//! Records are allocated in an [`Arena`] and linked into an ordered member
//! list. Membership and allocation are independent: a record may be
//! allocated but unlinked (created and not yet added, or forgotten), and
//! only an explicit free releases its slot.
//!
//! Callbacks and storage hooks are cloned out of the lock before they run,
//! so a callback may re-enter the list freely.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{Arena, RecordId};
use crate::error::{NativeError, NativeResult};
use crate::types::{ParamMask, ParamType, ParamValue, Provenance};

/// Value-changed callback slot. Receives the record and the changed offset
/// (`-1` when the whole value was written).
pub type ParamCallback = Arc<dyn Fn(RecordId, i32) + Send + Sync>;

/// Read hook consulted instead of the cached value.
pub type ReadHook = Arc<dyn Fn(RecordId, i32) -> Option<ParamValue> + Send + Sync>;

/// Write hook receiving values instead of the cache.
pub type WriteHook = Arc<dyn Fn(RecordId, i32, &ParamValue) + Send + Sync>;

/// Optional read/write redirection for a record's storage.
#[derive(Clone, Default)]
pub struct StorageHooks {
    pub read: Option<ReadHook>,
    pub write: Option<WriteHook>,
}

impl StorageHooks {
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

/// Metadata of a native record.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeParam {
    pub id: u16,
    pub node: u16,
    pub name: String,
    pub ty: ParamType,
    /// Number of elements. 1 for scalars.
    pub arity: usize,
    pub mask: ParamMask,
    pub unit: Option<String>,
    pub docstr: Option<String>,
    pub provenance: Provenance,
}

/// Description of a record to allocate.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub id: u16,
    pub node: u16,
    pub name: String,
    pub ty: ParamType,
    pub arity: usize,
    pub mask: ParamMask,
    pub unit: Option<String>,
    pub docstr: Option<String>,
}

impl RecordSpec {
    pub fn new(id: u16, name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            id,
            node: 0,
            name: name.into(),
            ty,
            arity: 1,
            mask: ParamMask::empty(),
            unit: None,
            docstr: None,
        }
    }

    pub fn node(mut self, node: u16) -> Self {
        self.node = node;
        self
    }

    pub fn arity(mut self, arity: usize) -> Self {
        self.arity = arity.max(1);
        self
    }

    pub fn mask(mut self, mask: ParamMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn docstr(mut self, docstr: impl Into<String>) -> Self {
        self.docstr = Some(docstr.into());
        self
    }
}

/// Result of linking a record into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    Added,
    /// The record was already a member.
    Present,
    /// Another record with the same id and node was unlinked (not freed).
    Replaced(RecordId),
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListStats {
    pub allocated: usize,
    pub freed: usize,
    pub live: usize,
    pub listed: usize,
}

/// Operations the bridge consumes from the parameter subsystem.
pub trait RecordStore: Send + Sync {
    fn find_record(&self, id: u16, node: u16) -> Option<RecordId>;
    fn find_by_name(&self, name: &str, node: u16) -> Option<RecordId>;
    /// Allocate a dynamic record without linking it.
    fn create_record(&self, spec: RecordSpec) -> NativeResult<RecordId>;
    fn list_insert(&self, record: RecordId, replace: bool) -> NativeResult<InsertStatus>;
    /// Unlink a record, optionally freeing it.
    fn list_remove(&self, record: RecordId, free_memory: bool) -> NativeResult<()>;
    fn list_iterate(&self) -> Vec<RecordId>;
    fn is_listed(&self, record: RecordId) -> bool;
    fn is_allocated(&self, record: RecordId) -> bool;
    fn free_record(&self, record: RecordId) -> NativeResult<()>;
    fn describe(&self, record: RecordId) -> NativeResult<NativeParam>;
    /// Install a callback and return the previous one.
    fn set_callback(
        &self,
        record: RecordId,
        callback: Option<ParamCallback>,
    ) -> NativeResult<Option<ParamCallback>>;
    /// Install storage hooks and return the previous ones.
    fn set_storage_hooks(&self, record: RecordId, hooks: StorageHooks)
    -> NativeResult<StorageHooks>;
    fn get_value(&self, record: RecordId, offset: i32) -> NativeResult<ParamValue>;
    /// Write a value and fire the record's callback.
    fn set_value(&self, record: RecordId, offset: i32, value: ParamValue) -> NativeResult<()>;
}

struct Record {
    info: NativeParam,
    values: Vec<ParamValue>,
    callback: Option<ParamCallback>,
    hooks: StorageHooks,
}

#[derive(Default)]
struct ListState {
    records: Arena<Record>,
    members: Vec<RecordId>,
    allocated: usize,
    freed: usize,
}

impl ListState {
    fn record(&self, id: RecordId) -> NativeResult<&Record> {
        self.records.get(id).ok_or(NativeError::StaleRecord(id))
    }

    fn record_mut(&mut self, id: RecordId) -> NativeResult<&mut Record> {
        self.records.get_mut(id).ok_or(NativeError::StaleRecord(id))
    }

    fn allocate(&mut self, spec: RecordSpec, provenance: Provenance) -> RecordId {
        let arity = spec.arity.max(1);
        let slots = if spec.ty.is_buffer() { 1 } else { arity };
        let record = Record {
            values: vec![spec.ty.zero(); slots],
            info: NativeParam {
                id: spec.id,
                node: spec.node,
                name: spec.name,
                ty: spec.ty,
                arity,
                mask: spec.mask,
                unit: spec.unit,
                docstr: spec.docstr,
                provenance,
            },
            callback: None,
            hooks: StorageHooks::default(),
        };
        self.allocated += 1;
        self.records.allocate(record)
    }

    fn find(&self, id: u16, node: u16) -> Option<RecordId> {
        self.members.iter().copied().find(|rid| {
            self.records
                .get(*rid)
                .is_some_and(|r| r.info.id == id && r.info.node == node)
        })
    }

    fn unlink(&mut self, record: RecordId) -> bool {
        match self.members.iter().position(|m| *m == record) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    fn free(&mut self, record: RecordId) -> NativeResult<()> {
        self.records
            .free(record)
            .ok_or(NativeError::StaleRecord(record))?;
        self.freed += 1;
        Ok(())
    }
}

/// Offset to storage index. Negative offsets address the first element.
fn slot_index(values_len: usize, offset: i32) -> NativeResult<usize> {
    let index = offset.max(0) as usize;
    if index >= values_len {
        return Err(NativeError::OffsetOutOfRange {
            index,
            len: values_len,
        });
    }
    Ok(index)
}

/// The process-wide parameter list of the foreign subsystem.
#[derive(Default)]
pub struct ParamList {
    state: Mutex<ListState>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and link a record owned by the subsystem itself.
    pub fn register_static(&self, spec: RecordSpec) -> NativeResult<RecordId> {
        let mut state = self.state.lock();
        if let Some(existing) = state.find(spec.id, spec.node) {
            let name = state.record(existing)?.info.name.clone();
            return Err(NativeError::AlreadyListed {
                id: spec.id,
                node: spec.node,
                name,
            });
        }
        let record = state.allocate(spec, Provenance::Static);
        state.members.push(record);
        tracing::debug!(%record, "registered static parameter");
        Ok(record)
    }

    /// Fire a record's callback without changing its value.
    pub fn notify(&self, record: RecordId, offset: i32) -> NativeResult<()> {
        let callback = self.state.lock().record(record)?.callback.clone();
        if let Some(callback) = callback {
            callback(record, offset);
        }
        Ok(())
    }

    pub fn stats(&self) -> ListStats {
        let state = self.state.lock();
        ListStats {
            allocated: state.allocated,
            freed: state.freed,
            live: state.records.len(),
            listed: state.members.len(),
        }
    }

    pub fn has_callback(&self, record: RecordId) -> bool {
        self.state
            .lock()
            .records
            .get(record)
            .is_some_and(|r| r.callback.is_some())
    }
}

impl RecordStore for ParamList {
    fn find_record(&self, id: u16, node: u16) -> Option<RecordId> {
        self.state.lock().find(id, node)
    }

    fn find_by_name(&self, name: &str, node: u16) -> Option<RecordId> {
        let state = self.state.lock();
        state.members.iter().copied().find(|rid| {
            state
                .records
                .get(*rid)
                .is_some_and(|r| r.info.name == name && r.info.node == node)
        })
    }

    fn create_record(&self, spec: RecordSpec) -> NativeResult<RecordId> {
        let mut state = self.state.lock();
        let record = state.allocate(spec, Provenance::Dynamic);
        tracing::debug!(%record, "allocated dynamic parameter");
        Ok(record)
    }

    fn list_insert(&self, record: RecordId, replace: bool) -> NativeResult<InsertStatus> {
        let mut state = self.state.lock();
        let (id, node) = {
            let info = &state.record(record)?.info;
            (info.id, info.node)
        };
        let existing = state.find(id, node);
        match existing {
            Some(existing) if existing == record => Ok(InsertStatus::Present),
            Some(existing) if !replace => Err(NativeError::AlreadyListed {
                id,
                node,
                name: state.record(existing)?.info.name.clone(),
            }),
            Some(existing) => {
                state.unlink(existing);
                state.members.push(record);
                Ok(InsertStatus::Replaced(existing))
            }
            None => {
                state.members.push(record);
                Ok(InsertStatus::Added)
            }
        }
    }

    fn list_remove(&self, record: RecordId, free_memory: bool) -> NativeResult<()> {
        let mut state = self.state.lock();
        let unlinked = state.unlink(record);
        if free_memory {
            state.free(record)?;
        }
        tracing::debug!(%record, unlinked, freed = free_memory, "removed parameter from list");
        Ok(())
    }

    fn list_iterate(&self) -> Vec<RecordId> {
        self.state.lock().members.clone()
    }

    fn is_listed(&self, record: RecordId) -> bool {
        self.state.lock().members.contains(&record)
    }

    fn is_allocated(&self, record: RecordId) -> bool {
        self.state.lock().records.contains(record)
    }

    fn free_record(&self, record: RecordId) -> NativeResult<()> {
        let mut state = self.state.lock();
        state.unlink(record);
        state.free(record)?;
        tracing::debug!(%record, "freed parameter");
        Ok(())
    }

    fn describe(&self, record: RecordId) -> NativeResult<NativeParam> {
        Ok(self.state.lock().record(record)?.info.clone())
    }

    fn set_callback(
        &self,
        record: RecordId,
        callback: Option<ParamCallback>,
    ) -> NativeResult<Option<ParamCallback>> {
        let mut state = self.state.lock();
        let slot = &mut state.record_mut(record)?.callback;
        Ok(std::mem::replace(slot, callback))
    }

    fn set_storage_hooks(
        &self,
        record: RecordId,
        hooks: StorageHooks,
    ) -> NativeResult<StorageHooks> {
        let mut state = self.state.lock();
        let slot = &mut state.record_mut(record)?.hooks;
        Ok(std::mem::replace(slot, hooks))
    }

    fn get_value(&self, record: RecordId, offset: i32) -> NativeResult<ParamValue> {
        let (read, cached) = {
            let state = self.state.lock();
            let rec = state.record(record)?;
            let index = slot_index(rec.values.len(), offset)?;
            (rec.hooks.read.clone(), rec.values[index].clone())
        };
        if let Some(read) = read
            && let Some(value) = read(record, offset)
        {
            return Ok(value);
        }
        Ok(cached)
    }

    fn set_value(&self, record: RecordId, offset: i32, value: ParamValue) -> NativeResult<()> {
        let (write, callback, value) = {
            let mut state = self.state.lock();
            let rec = state.record_mut(record)?;
            let index = slot_index(rec.values.len(), offset)?;
            let value = rec.info.ty.coerce(value)?;
            if rec.hooks.write.is_none() {
                rec.values[index] = value.clone();
            }
            (rec.hooks.write.clone(), rec.callback.clone(), value)
        };
        if let Some(write) = write {
            write(record, offset, &value);
        }
        if let Some(callback) = callback {
            tracing::trace!(%record, offset, "firing parameter callback");
            callback(record, offset);
        }
        Ok(())
    }
}
