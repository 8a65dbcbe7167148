//! Ownership and destruction state machine.
//!
//! ```text
//! NativeOnly ──construct──▶ Bridged ◀──keep_alive(false)── BridgedKeepAlive
//!                              │  ──keep_alive(true)──▶        │
//!                              └──last ref / forget──▶ Destroyed ◀──forget──┘
//! ```
//!
//! Destruction authority follows the record's provenance. Static records
//! are never freed here. A dynamic record is freed exactly once: by the
//! list if it is still linked, otherwise by the handle.

use std::fmt;

use parambridge_native::{Provenance, RecordId};

use crate::error::BridgeError;

/// Lifecycle state of a native record as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnershipState {
    /// The record exists and no handle refers to it.
    NativeOnly,
    /// A handle exists and the registry maps the record to it.
    Bridged,
    /// Bridged, and the handle holds a strong reference to itself.
    BridgedKeepAlive,
    /// The handle released its record.
    Destroyed,
}

impl OwnershipState {
    pub fn is_bridged(self) -> bool {
        matches!(
            self,
            OwnershipState::Bridged | OwnershipState::BridgedKeepAlive
        )
    }
}

impl fmt::Display for OwnershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OwnershipState::NativeOnly => "native-only",
            OwnershipState::Bridged => "bridged",
            OwnershipState::BridgedKeepAlive => "bridged-keep-alive",
            OwnershipState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// What a destroyed handle does with its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Restore the record's previous callback. The record stays allocated.
    ReleaseSlot,
    /// Unlink from the list and free.
    UnlinkAndFree,
    /// Already unlinked by the list; the handle frees it.
    FreeUnlinked,
}

/// A handle refers to a record that nobody owns any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseAfterFreeViolation {
    pub record: RecordId,
}

impl From<UseAfterFreeViolation> for BridgeError {
    fn from(violation: UseAfterFreeViolation) -> Self {
        BridgeError::UseAfterFree {
            record: violation.record,
        }
    }
}

/// Decide how to dispose of `record` when its handle is destroyed.
///
/// `listed` and `allocated` are the foreign subsystem's current view.
pub fn plan_disposal(
    record: RecordId,
    provenance: Provenance,
    listed: bool,
    allocated: bool,
) -> Result<Disposal, UseAfterFreeViolation> {
    if !allocated {
        return Err(UseAfterFreeViolation { record });
    }
    Ok(match (provenance, listed) {
        (Provenance::Static, _) => Disposal::ReleaseSlot,
        (Provenance::Dynamic, true) => Disposal::UnlinkAndFree,
        (Provenance::Dynamic, false) => Disposal::FreeUnlinked,
    })
}

/// Report an invariant breach and abort the process.
///
/// Memory safety can no longer be guaranteed, so no recovery is attempted.
pub fn abort_on_violation(violation: UseAfterFreeViolation, name: &str) -> ! {
    tracing::error!(
        record = %violation.record,
        name,
        "handle refers to a record owned by neither the registry nor the list"
    );
    std::process::abort()
}

/// Observable state of a handle.
pub(crate) fn handle_state(destroyed: bool, keep_alive: bool) -> OwnershipState {
    match (destroyed, keep_alive) {
        (true, _) => OwnershipState::Destroyed,
        (false, true) => OwnershipState::BridgedKeepAlive,
        (false, false) => OwnershipState::Bridged,
    }
}
