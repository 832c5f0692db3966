//! Cache entry lifecycle: Absent → Pending → Success, with failures and
//! eviction returning the entry to Absent.

use serde::Serialize;
use tracing::{debug, warn};

/// State of one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Absent,
    Pending,
    Success,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryState::Absent => write!(f, "Absent"),
            EntryState::Pending => write!(f, "Pending"),
            EntryState::Success => write!(f, "Success"),
        }
    }
}

impl EntryState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: EntryState) -> bool {
        matches!(
            (self, next),
            (EntryState::Absent, EntryState::Pending) // claimed by first caller
                | (EntryState::Pending, EntryState::Success)
                | (EntryState::Pending, EntryState::Absent) // producer failed
                | (EntryState::Success, EntryState::Absent) // capacity / ttl / explicit eviction
        )
    }
}

/// Log a transition for `key`, flagging any the lifecycle does not allow.
pub fn record_transition(key: &str, from: EntryState, to: EntryState) -> bool {
    if !from.can_transition_to(to) {
        warn!(key, from = %from, to = %to, "invalid cache entry transition");
        debug_assert!(false, "invalid cache entry transition {from} -> {to}");
        return false;
    }
    debug!(key, from = %from, to = %to, "cache_entry_transition");
    true
}
