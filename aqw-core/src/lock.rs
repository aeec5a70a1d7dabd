//! Task lock manager
//!
//! Time-leased mutual exclusion over a task: only one annotator may edit
//! a task's live annotation at a time. Contention is a typed outcome, not
//! an error, so callers decide whether to retry, queue or surface a UI
//! conflict. Expired leases are reclaimed lazily at acquire time; there
//! is no background sweep.

use crate::store::KeyedStore;
use aqw_common::events::{AqwEvent, EventBus};
use aqw_common::models::Lock;
use aqw_common::{SharedClock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Result of an acquire attempt
#[derive(Debug, Clone, Serialize)]
pub enum AcquireOutcome {
    /// Lease granted to the caller
    Acquired(Lock),
    /// A non-expired lease is held by someone else
    Busy {
        holder_id: String,
        expires_at: DateTime<Utc>,
    },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

/// Manages editing leases, one per task
///
/// The per-task entry outlives the lease itself (an empty slot is the
/// mutex anchor for the next acquire); the lease is dropped on release
/// or reclaimed on expiry.
pub struct TaskLockManager {
    table: KeyedStore<String, Option<Lock>>,
    clock: SharedClock,
    event_bus: EventBus,
}

impl TaskLockManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_clock(event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            table: KeyedStore::new(),
            clock,
            event_bus,
        }
    }

    /// Attempt to acquire the editing lease for a task
    ///
    /// Succeeds when no lease exists, the existing lease has expired, or
    /// the caller already holds it (re-acquiring is how a holder extends
    /// its lease; there is no separate renewal primitive).
    pub async fn acquire(&self, task_id: &str, holder_id: &str, ttl: Duration) -> AcquireOutcome {
        let entry = self.table.entry(&task_id.to_string()).await;
        let mut slot = entry.lock().await;
        let now = self.clock.now();

        if let Some(existing) = slot.as_ref() {
            if !existing.is_expired(now) && existing.holder_id != holder_id {
                debug!(
                    task_id = %task_id,
                    holder_id = %holder_id,
                    held_by = %existing.holder_id,
                    "Lock acquire denied: task busy"
                );
                return AcquireOutcome::Busy {
                    holder_id: existing.holder_id.clone(),
                    expires_at: existing.expires_at,
                };
            }
        }

        let lock = Lock {
            task_id: task_id.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        *slot = Some(lock.clone());

        debug!(
            task_id = %task_id,
            holder_id = %holder_id,
            expires_at = %lock.expires_at,
            "Lock acquired"
        );
        self.event_bus.emit_lossy(AqwEvent::LockAcquired {
            task_id: task_id.to_string(),
            holder_id: holder_id.to_string(),
            expires_at: lock.expires_at,
            timestamp: now,
        });

        AcquireOutcome::Acquired(lock)
    }

    /// Release the lease if the caller holds it
    ///
    /// Releasing a non-held or already-expired lease is a no-op
    /// returning false, not an error.
    pub async fn release(&self, task_id: &str, holder_id: &str) -> bool {
        let Some(entry) = self.table.get(&task_id.to_string()).await else {
            return false;
        };
        let mut slot = entry.lock().await;
        let now = self.clock.now();

        match slot.as_ref() {
            Some(lock) if lock.holder_id == holder_id && !lock.is_expired(now) => {
                *slot = None;
                debug!(task_id = %task_id, holder_id = %holder_id, "Lock released");
                self.event_bus.emit_lossy(AqwEvent::LockReleased {
                    task_id: task_id.to_string(),
                    holder_id: holder_id.to_string(),
                    timestamp: now,
                });
                true
            }
            _ => false,
        }
    }

    /// Whether a non-expired lease exists for the task
    pub async fn is_locked(&self, task_id: &str) -> bool {
        self.get_lock(task_id).await.is_some()
    }

    /// The current non-expired lease, if any
    pub async fn get_lock(&self, task_id: &str) -> Option<Lock> {
        let entry = self.table.get(&task_id.to_string()).await?;
        let slot = entry.lock().await;
        let now = self.clock.now();
        slot.as_ref().filter(|l| !l.is_expired(now)).cloned()
    }
}
