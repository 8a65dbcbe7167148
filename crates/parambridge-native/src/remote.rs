//! Remote transaction seam.
//!
//! The wire protocol is not modeled. A [`RemoteLink`] pulls a remote value
//! into the local cache or pushes a value to a remote node, blocking the
//! caller until the exchange completes or times out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::arena::RecordId;
use crate::error::NativeResult;
use crate::param_list::RecordStore;
use crate::types::ParamValue;

/// Blocking remote get/set. Returns `Ok(false)` when the node did not answer.
pub trait RemoteLink: Send + Sync {
    fn pull(
        &self,
        store: &dyn RecordStore,
        record: RecordId,
        offset: i32,
        node: u16,
        timeout: Duration,
    ) -> NativeResult<bool>;

    fn push(
        &self,
        store: &dyn RecordStore,
        record: RecordId,
        offset: i32,
        value: &ParamValue,
        node: u16,
        timeout: Duration,
    ) -> NativeResult<bool>;
}

/// In-process stand-in for remote nodes.
///
/// Remote values are kept per `(node, id, offset)`. A pull writes the remote
/// value into the local cache through [`RecordStore::set_value`], so the
/// record's callback fires just as it would for a network update.
#[derive(Default)]
pub struct LoopbackLink {
    remote: Mutex<FxHashMap<(u16, u16, i32), ParamValue>>,
    fail_next: AtomicUsize,
    latency: Mutex<Duration>,
    attempts: AtomicUsize,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` transactions time out.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_remote(&self, node: u16, id: u16, offset: i32, value: ParamValue) {
        self.remote.lock().insert((node, id, offset.max(0)), value);
    }

    pub fn remote(&self, node: u16, id: u16, offset: i32) -> Option<ParamValue> {
        self.remote.lock().get(&(node, id, offset.max(0))).cloned()
    }

    /// Total transactions attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn exchange(&self, timeout: Duration) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency.min(timeout));
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

impl RemoteLink for LoopbackLink {
    fn pull(
        &self,
        store: &dyn RecordStore,
        record: RecordId,
        offset: i32,
        node: u16,
        timeout: Duration,
    ) -> NativeResult<bool> {
        if !self.exchange(timeout) {
            return Ok(false);
        }
        let id = store.describe(record)?.id;
        if let Some(value) = self.remote(node, id, offset) {
            store.set_value(record, offset, value)?;
        }
        Ok(true)
    }

    fn push(
        &self,
        store: &dyn RecordStore,
        record: RecordId,
        offset: i32,
        value: &ParamValue,
        node: u16,
        timeout: Duration,
    ) -> NativeResult<bool> {
        if !self.exchange(timeout) {
            return Ok(false);
        }
        let id = store.describe(record)?.id;
        self.set_remote(node, id, offset, value.clone());
        Ok(true)
    }
}
