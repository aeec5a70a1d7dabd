//! Event types for the AQW event system
//!
//! Components broadcast domain events via the EventBus so the excluded
//! notification and reporting layers can observe state changes without
//! reaching into component storage. Emission is lossy: no core operation
//! fails because nobody is listening.

use crate::models::{ChangeType, ConflictType, ResolutionMethod, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// AQW domain event types
///
/// Events are broadcast via EventBus and can be serialized for transport
/// by the surrounding request layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AqwEvent {
    /// A new annotation version was recorded
    VersionCreated {
        task_id: String,
        annotator_id: String,
        version_id: Uuid,
        version_number: u64,
        change_type: ChangeType,
        timestamp: DateTime<Utc>,
    },

    /// A version chain was rolled back to an earlier state
    VersionRolledBack {
        task_id: String,
        annotator_id: String,
        target_version_number: u64,
        new_version_id: Uuid,
        actor_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An editing lease was granted
    LockAcquired {
        task_id: String,
        holder_id: String,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// An editing lease was released by its holder
    LockReleased {
        task_id: String,
        holder_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Current labels for a task no longer agree
    DisagreementDetected {
        task_id: String,
        severity: Severity,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A disagreement was escalated for explicit resolution
    ConflictOpened {
        conflict_id: Uuid,
        task_id: String,
        conflict_type: ConflictType,
        timestamp: DateTime<Utc>,
    },

    /// A vote was cast on an open conflict
    VoteCast {
        conflict_id: Uuid,
        voter_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A conflict reached its resolution
    ConflictResolved {
        conflict_id: Uuid,
        method: ResolutionMethod,
        result: String,
        timestamp: DateTime<Utc>,
    },

    /// An annotation entered the review pipeline
    ReviewSubmitted {
        review_task_id: Uuid,
        annotation_id: String,
        max_level: u8,
        timestamp: DateTime<Utc>,
    },

    /// A review advanced to the next level without finishing
    ReviewAdvanced {
        review_task_id: Uuid,
        reviewer_id: String,
        new_level: u8,
        timestamp: DateTime<Utc>,
    },

    /// A review reached final approval
    ReviewApproved {
        review_task_id: Uuid,
        reviewer_id: String,
        /// True when the configured auto-approve policy applied
        auto: bool,
        timestamp: DateTime<Utc>,
    },

    /// A review was rejected
    ReviewRejected {
        review_task_id: Uuid,
        reviewer_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A rejected review re-entered the pipeline at level 1
    ReviewResubmitted {
        review_task_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl AqwEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            AqwEvent::VersionCreated { .. } => "VersionCreated",
            AqwEvent::VersionRolledBack { .. } => "VersionRolledBack",
            AqwEvent::LockAcquired { .. } => "LockAcquired",
            AqwEvent::LockReleased { .. } => "LockReleased",
            AqwEvent::DisagreementDetected { .. } => "DisagreementDetected",
            AqwEvent::ConflictOpened { .. } => "ConflictOpened",
            AqwEvent::VoteCast { .. } => "VoteCast",
            AqwEvent::ConflictResolved { .. } => "ConflictResolved",
            AqwEvent::ReviewSubmitted { .. } => "ReviewSubmitted",
            AqwEvent::ReviewAdvanced { .. } => "ReviewAdvanced",
            AqwEvent::ReviewApproved { .. } => "ReviewApproved",
            AqwEvent::ReviewRejected { .. } => "ReviewRejected",
            AqwEvent::ReviewResubmitted { .. } => "ReviewResubmitted",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: non-blocking publish, multiple
/// concurrent subscribers, automatic cleanup when subscribers drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AqwEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per
    /// subscriber before old events are dropped
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Events emitted before
    /// subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AqwEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if none are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: AqwEvent) -> Result<usize, broadcast::error::SendError<AqwEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// This is the form components use: state changes must succeed even
    /// with no observers attached.
    pub fn emit_lossy(&self, event: AqwEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
