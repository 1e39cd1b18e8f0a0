//! Activity clock and inactivity-timer bookkeeping.
//!
//! Every live index has exactly one entry here: a last-activity instant and, when monitoring
//! applies, the abort handle of the pending eviction timer. Replacing a timer aborts the old
//! one first, so any activity bump atomically replaces the pending deadline.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::task::AbortHandle;

struct ActivityEntry {
    last_activity: Instant,
    timer: Option<AbortHandle>,
}

/// Last-activity instants and pending eviction timers, keyed by index id.
#[derive(Default)]
pub(crate) struct ActivityClock {
    entries: Mutex<HashMap<String, ActivityEntry>>,
}

impl ActivityClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a fresh entry for a newly live index.
    pub(crate) fn prime(&self, id: &str) {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        entries.insert(
            id.to_string(),
            ActivityEntry {
                last_activity: Instant::now(),
                timer: None,
            },
        );
    }

    /// Advance the last-activity instant. Returns false when the id is unknown.
    pub(crate) fn bump(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        match entries.get_mut(id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Last-activity instant for the id, if it is live.
    pub(crate) fn last_activity(&self, id: &str) -> Option<Instant> {
        let entries = self.entries.lock().expect("activity clock poisoned");
        entries.get(id).map(|entry| entry.last_activity)
    }

    /// Install a new pending timer, aborting any previous one.
    pub(crate) fn set_timer(&self, id: &str, handle: AbortHandle) {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        if let Some(entry) = entries.get_mut(id) {
            if let Some(previous) = entry.timer.replace(handle) {
                previous.abort();
            }
        } else {
            // The index disappeared between arming and registration.
            handle.abort();
        }
    }

    /// Abort and clear the pending timer for the id.
    pub(crate) fn cancel_timer(&self, id: &str) {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        if let Some(entry) = entries.get_mut(id)
            && let Some(timer) = entry.timer.take()
        {
            timer.abort();
        }
    }

    /// Abort every pending timer, keeping the activity instants.
    pub(crate) fn cancel_all_timers(&self) {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        for entry in entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    /// Drop the entry entirely, aborting its timer.
    pub(crate) fn remove(&self, id: &str) {
        let mut entries = self.entries.lock().expect("activity clock poisoned");
        if let Some(entry) = entries.remove(id)
            && let Some(timer) = entry.timer
        {
            timer.abort();
        }
    }

    /// Number of armed timers.
    pub(crate) fn active_timers(&self) -> usize {
        let entries = self.entries.lock().expect("activity clock poisoned");
        entries
            .values()
            .filter(|entry| entry.timer.is_some())
            .count()
    }
}
