//! Review flow engine
//!
//! Multi-level approval state machine for submitted annotations:
//! pending(level n) advances level by level to approved, or drops to
//! rejected from any level; a rejected review may re-enter at level 1
//! once improvement work completes. Every reviewer action appends to an
//! append-only history, the durable audit surface external reporting and
//! billing read.

use crate::store::KeyedStore;
use aqw_common::config::ReviewConfig;
use aqw_common::events::{AqwEvent, EventBus};
use aqw_common::models::{ReviewAction, ReviewHistoryEntry, ReviewStatus, ReviewTask};
use aqw_common::{SharedClock, SystemClock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Reviewer id recorded for policy-driven approvals
const AUTO_APPROVE_ACTOR: &str = "auto-approve";

/// Review flow errors; all recoverable caller errors
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review task {0} not found")]
    NotFound(Uuid),

    /// The task already reached approved or rejected
    #[error("review task {id} is already {status}")]
    AlreadyFinalized { id: Uuid, status: ReviewStatus },

    /// Resubmission applies to rejected tasks only
    #[error("review task {id} is {status}, not rejected")]
    NotRejected { id: Uuid, status: ReviewStatus },

    /// A rejection must say why
    #[error("rejection of review task {0} requires a reason")]
    ReasonRequired(Uuid),
}

/// Per-item outcome of a batch approval
#[derive(Debug)]
pub struct BatchFailure {
    pub review_task_id: Uuid,
    pub error: ReviewError,
}

/// Result of a batch approval; partial success is expected and reported,
/// never converted into a wholesale failure
#[derive(Debug, Default)]
pub struct BatchApproveOutcome {
    pub approved: Vec<ReviewTask>,
    pub failures: Vec<BatchFailure>,
}

struct ReviewRecord {
    task: ReviewTask,
    history: Vec<ReviewHistoryEntry>,
}

/// Owns ReviewTasks and their history
pub struct ReviewFlowEngine {
    records: KeyedStore<Uuid, ReviewRecord>,
    policy: ReviewConfig,
    clock: SharedClock,
    event_bus: EventBus,
}

impl ReviewFlowEngine {
    pub fn new(policy: ReviewConfig, event_bus: EventBus) -> Self {
        Self::with_clock(policy, event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: ReviewConfig, event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            records: KeyedStore::new(),
            policy,
            clock,
            event_bus,
        }
    }

    /// Enter an annotation into review at level 1
    ///
    /// When the caller supplies an agreement score and the configured
    /// auto-approve policy is enabled, a score at or above the pass
    /// threshold approves immediately, bypassing manual levels. Without a
    /// score the engine never auto-approves; the decision input must come
    /// from the caller.
    pub async fn submit_for_review(
        &self,
        annotation_id: &str,
        levels: u8,
        agreement_score: Option<f64>,
    ) -> ReviewTask {
        let now = self.clock.now();
        let max_level = levels.max(1);
        let mut task = ReviewTask {
            id: Uuid::new_v4(),
            annotation_id: annotation_id.to_string(),
            current_level: 1,
            max_level,
            status: ReviewStatus::Pending,
            submitted_at: now,
            updated_at: now,
        };
        let mut history = Vec::new();

        let auto_approved = self.policy.auto_approve
            && agreement_score.is_some_and(|s| s >= self.policy.pass_threshold);
        if auto_approved {
            task.status = ReviewStatus::Approved;
            history.push(ReviewHistoryEntry {
                review_task_id: task.id,
                reviewer_id: AUTO_APPROVE_ACTOR.to_string(),
                action: ReviewAction::AutoApprove,
                level: task.current_level,
                reason: None,
                created_at: now,
            });
        }

        self.records
            .insert(
                task.id,
                ReviewRecord {
                    task: task.clone(),
                    history,
                },
            )
            .await;

        info!(
            review_task_id = %task.id,
            annotation_id = %annotation_id,
            max_level,
            auto_approved,
            "Annotation submitted for review"
        );
        self.event_bus.emit_lossy(AqwEvent::ReviewSubmitted {
            review_task_id: task.id,
            annotation_id: annotation_id.to_string(),
            max_level,
            timestamp: now,
        });
        if auto_approved {
            self.event_bus.emit_lossy(AqwEvent::ReviewApproved {
                review_task_id: task.id,
                reviewer_id: AUTO_APPROVE_ACTOR.to_string(),
                auto: true,
                timestamp: now,
            });
        }

        task
    }

    /// Approve at the current level
    ///
    /// Below max_level this advances the level and stays pending; at
    /// max_level the task is approved. Either way a history entry is
    /// appended with the resulting level.
    pub async fn approve(
        &self,
        review_task_id: Uuid,
        reviewer_id: &str,
    ) -> Result<ReviewTask, ReviewError> {
        let entry = self
            .records
            .get(&review_task_id)
            .await
            .ok_or(ReviewError::NotFound(review_task_id))?;
        let mut record = entry.lock().await;

        if record.task.is_terminal() {
            return Err(ReviewError::AlreadyFinalized {
                id: review_task_id,
                status: record.task.status,
            });
        }

        let now = self.clock.now();
        if record.task.current_level < record.task.max_level {
            record.task.current_level += 1;
            debug!(
                review_task_id = %review_task_id,
                reviewer_id = %reviewer_id,
                new_level = record.task.current_level,
                "Review advanced"
            );
            self.event_bus.emit_lossy(AqwEvent::ReviewAdvanced {
                review_task_id,
                reviewer_id: reviewer_id.to_string(),
                new_level: record.task.current_level,
                timestamp: now,
            });
        } else {
            record.task.status = ReviewStatus::Approved;
            info!(
                review_task_id = %review_task_id,
                reviewer_id = %reviewer_id,
                "Review approved"
            );
            self.event_bus.emit_lossy(AqwEvent::ReviewApproved {
                review_task_id,
                reviewer_id: reviewer_id.to_string(),
                auto: false,
                timestamp: now,
            });
        }
        record.task.updated_at = now;

        let level = record.task.current_level;
        record.history.push(ReviewHistoryEntry {
            review_task_id,
            reviewer_id: reviewer_id.to_string(),
            action: ReviewAction::Approve,
            level,
            reason: None,
            created_at: now,
        });

        Ok(record.task.clone())
    }

    /// Reject at any level; the reason is mandatory and stored
    pub async fn reject(
        &self,
        review_task_id: Uuid,
        reviewer_id: &str,
        reason: &str,
    ) -> Result<ReviewTask, ReviewError> {
        if reason.trim().is_empty() {
            return Err(ReviewError::ReasonRequired(review_task_id));
        }

        let entry = self
            .records
            .get(&review_task_id)
            .await
            .ok_or(ReviewError::NotFound(review_task_id))?;
        let mut record = entry.lock().await;

        if record.task.is_terminal() {
            return Err(ReviewError::AlreadyFinalized {
                id: review_task_id,
                status: record.task.status,
            });
        }

        let now = self.clock.now();
        record.task.status = ReviewStatus::Rejected;
        record.task.updated_at = now;
        let level = record.task.current_level;
        record.history.push(ReviewHistoryEntry {
            review_task_id,
            reviewer_id: reviewer_id.to_string(),
            action: ReviewAction::Reject,
            level,
            reason: Some(reason.to_string()),
            created_at: now,
        });

        info!(
            review_task_id = %review_task_id,
            reviewer_id = %reviewer_id,
            reason = %reason,
            "Review rejected"
        );
        self.event_bus.emit_lossy(AqwEvent::ReviewRejected {
            review_task_id,
            reviewer_id: reviewer_id.to_string(),
            reason: reason.to_string(),
            timestamp: now,
        });

        Ok(record.task.clone())
    }

    /// Approve many review tasks independently
    ///
    /// A failure on one id is captured per item and does not abort the
    /// rest of the batch.
    pub async fn batch_approve(
        &self,
        review_task_ids: &[Uuid],
        reviewer_id: &str,
    ) -> BatchApproveOutcome {
        let mut outcome = BatchApproveOutcome::default();
        for &id in review_task_ids {
            match self.approve(id, reviewer_id).await {
                Ok(task) => outcome.approved.push(task),
                Err(error) => outcome.failures.push(BatchFailure {
                    review_task_id: id,
                    error,
                }),
            }
        }
        debug!(
            reviewer_id = %reviewer_id,
            approved = outcome.approved.len(),
            failed = outcome.failures.len(),
            "Batch approval finished"
        );
        outcome
    }

    /// Re-enter a rejected review at level 1 after improvement work
    pub async fn resubmit(
        &self,
        review_task_id: Uuid,
        actor_id: &str,
    ) -> Result<ReviewTask, ReviewError> {
        let entry = self
            .records
            .get(&review_task_id)
            .await
            .ok_or(ReviewError::NotFound(review_task_id))?;
        let mut record = entry.lock().await;

        if record.task.status != ReviewStatus::Rejected {
            return Err(ReviewError::NotRejected {
                id: review_task_id,
                status: record.task.status,
            });
        }

        let now = self.clock.now();
        record.task.status = ReviewStatus::Pending;
        record.task.current_level = 1;
        record.task.updated_at = now;
        record.history.push(ReviewHistoryEntry {
            review_task_id,
            reviewer_id: actor_id.to_string(),
            action: ReviewAction::Resubmit,
            level: 1,
            reason: None,
            created_at: now,
        });

        info!(review_task_id = %review_task_id, "Review resubmitted");
        self.event_bus.emit_lossy(AqwEvent::ReviewResubmitted {
            review_task_id,
            timestamp: now,
        });

        Ok(record.task.clone())
    }

    pub async fn get_task(&self, review_task_id: Uuid) -> Result<ReviewTask, ReviewError> {
        let entry = self
            .records
            .get(&review_task_id)
            .await
            .ok_or(ReviewError::NotFound(review_task_id))?;
        let record = entry.lock().await;
        Ok(record.task.clone())
    }

    /// The append-only audit trail for one review task
    pub async fn history(
        &self,
        review_task_id: Uuid,
    ) -> Result<Vec<ReviewHistoryEntry>, ReviewError> {
        let entry = self
            .records
            .get(&review_task_id)
            .await
            .ok_or(ReviewError::NotFound(review_task_id))?;
        let record = entry.lock().await;
        Ok(record.history.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ReviewFlowEngine {
        ReviewFlowEngine::new(ReviewConfig::default(), EventBus::new(16))
    }

    fn auto_engine(pass_threshold: f64) -> ReviewFlowEngine {
        ReviewFlowEngine::new(
            ReviewConfig {
                auto_approve: true,
                pass_threshold,
                default_levels: 2,
            },
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn test_two_level_flow() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 2, None).await;
        assert_eq!(task.current_level, 1);
        assert_eq!(task.status, ReviewStatus::Pending);

        let task = engine.approve(task.id, "rev-1").await.unwrap();
        assert_eq!(task.current_level, 2);
        assert_eq!(task.status, ReviewStatus::Pending);

        let task = engine.approve(task.id, "rev-2").await.unwrap();
        assert_eq!(task.status, ReviewStatus::Approved);

        let history = engine.history(task.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].level, 2);
        assert_eq!(history[0].reviewer_id, "rev-1");
        assert_eq!(history[1].reviewer_id, "rev-2");
    }

    #[tokio::test]
    async fn test_level_never_exceeds_max() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 1, None).await;
        let task = engine.approve(task.id, "rev-1").await.unwrap();
        assert_eq!(task.status, ReviewStatus::Approved);
        assert_eq!(task.current_level, 1);

        // Approving a finished task is an error, not a level bump
        let again = engine.approve(task.id, "rev-1").await;
        assert!(matches!(again, Err(ReviewError::AlreadyFinalized { .. })));
    }

    #[tokio::test]
    async fn test_reject_any_level_requires_reason() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 3, None).await;
        engine.approve(task.id, "rev-1").await.unwrap();

        let missing = engine.reject(task.id, "rev-2", "  ").await;
        assert!(matches!(missing, Err(ReviewError::ReasonRequired(_))));

        let task = engine
            .reject(task.id, "rev-2", "span boundaries wrong")
            .await
            .unwrap();
        assert_eq!(task.status, ReviewStatus::Rejected);

        let history = engine.history(task.id).await.unwrap();
        let reject_entry = history.last().unwrap();
        assert_eq!(reject_entry.action, ReviewAction::Reject);
        assert_eq!(reject_entry.reason.as_deref(), Some("span boundaries wrong"));
    }

    #[tokio::test]
    async fn test_resubmission_cycle() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 2, None).await;
        engine.approve(task.id, "rev-1").await.unwrap();
        engine.reject(task.id, "rev-2", "bad label").await.unwrap();

        let task = engine.resubmit(task.id, "alice").await.unwrap();
        assert_eq!(task.status, ReviewStatus::Pending);
        assert_eq!(task.current_level, 1);

        // Resubmitting a pending task is rejected
        let again = engine.resubmit(task.id, "alice").await;
        assert!(matches!(again, Err(ReviewError::NotRejected { .. })));
    }

    #[tokio::test]
    async fn test_batch_approve_partial_success() {
        let engine = engine();
        let a = engine.submit_for_review("ann-a", 1, None).await;
        let b = engine.submit_for_review("ann-b", 1, None).await;
        let unknown = Uuid::new_v4();

        let outcome = engine.batch_approve(&[a.id, unknown, b.id], "rev-1").await;
        assert_eq!(outcome.approved.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].review_task_id, unknown);
        assert!(matches!(outcome.failures[0].error, ReviewError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_approve_policy() {
        let engine = auto_engine(0.9);

        // Above threshold: bypasses manual levels
        let task = engine.submit_for_review("ann-1", 2, Some(0.95)).await;
        assert_eq!(task.status, ReviewStatus::Approved);
        let history = engine.history(task.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, ReviewAction::AutoApprove);

        // Below threshold: normal pending flow
        let task = engine.submit_for_review("ann-2", 2, Some(0.5)).await;
        assert_eq!(task.status, ReviewStatus::Pending);

        // No score supplied: the engine never decides unattended
        let task = engine.submit_for_review("ann-3", 2, None).await;
        assert_eq!(task.status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn test_auto_approve_disabled_ignores_score() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 2, Some(1.0)).await;
        assert_eq!(task.status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_task_not_found() {
        let engine = engine();
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.approve(id, "rev-1").await,
            Err(ReviewError::NotFound(_))
        ));
        assert!(matches!(
            engine.reject(id, "rev-1", "x").await,
            Err(ReviewError::NotFound(_))
        ));
        assert!(matches!(engine.get_task(id).await, Err(ReviewError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_zero_levels_clamped_to_one() {
        let engine = engine();
        let task = engine.submit_for_review("ann-1", 0, None).await;
        assert_eq!(task.max_level, 1);
        let task = engine.approve(task.id, "rev-1").await.unwrap();
        assert_eq!(task.status, ReviewStatus::Approved);
    }
}
