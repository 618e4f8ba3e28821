//! Coalescing delay queue for rollup jobs
//!
//! Jobs are keyed strings with a due time as priority. Re-inserting an
//! existing key overwrites its due time instead of adding a second entry;
//! that last-write-wins upsert is the debounce mechanism the scheduler
//! relies on, so the entry count is bounded by distinct jobs, not by the
//! number of samples.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use beacon_shared::error::StoreError;

/// Shared scheduler store. The in-memory implementation below serves a
/// single process; a multi-process deployment plugs a shared external store
/// in behind this trait.
pub trait DelayQueue: Send + Sync {
    /// Insert or refresh a job; an existing key keeps one entry and takes
    /// the new due time.
    fn upsert(&self, key: &str, due: i64) -> Result<(), StoreError>;

    /// Atomically claim up to `limit` jobs with `due <= now`, earliest
    /// first. A claimed job is removed; no other caller can see it.
    fn pop_due(&self, now: i64, limit: usize) -> Result<Vec<String>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    due_by_key: HashMap<String, i64>,
    /// (due, key) pairs ordered by due time
    ordered: BTreeSet<(i64, String)>,
}

/// In-process delay queue.
#[derive(Debug, Default)]
pub struct MemoryDelayQueue {
    inner: Mutex<Inner>,
}

impl MemoryDelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current due time for a key, if queued.
    pub fn due(&self, key: &str) -> Option<i64> {
        self.inner.lock().ok()?.due_by_key.get(key).copied()
    }
}

impl DelayQueue for MemoryDelayQueue {
    fn upsert(&self, key: &str, due: i64) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("delay queue lock poisoned".into()))?;
        if let Some(old) = inner.due_by_key.insert(key.to_string(), due) {
            inner.ordered.remove(&(old, key.to_string()));
        }
        inner.ordered.insert((due, key.to_string()));
        Ok(())
    }

    fn pop_due(&self, now: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("delay queue lock poisoned".into()))?;
        let mut claimed = Vec::new();
        while claimed.len() < limit {
            let Some((due, key)) = inner.ordered.first().cloned() else {
                break;
            };
            if due > now {
                break;
            }
            inner.ordered.remove(&(due, key.clone()));
            inner.due_by_key.remove(&key);
            claimed.push(key);
        }
        Ok(claimed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("delay queue lock poisoned".into()))?;
        Ok(inner.due_by_key.len())
    }
}
