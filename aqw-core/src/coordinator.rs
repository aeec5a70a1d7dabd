//! Workflow coordinator
//!
//! Composes the quality components into the submission pipeline:
//! version the annotation, release the annotator's editing lease, score
//! agreement across the task's current annotations, analyze any
//! disagreement and escalate a low-agreement task into an open conflict.
//! Each component stays independently usable; the coordinator only
//! sequences them and carries the per-task annotation registry they
//! share.

use crate::agreement::AgreementEngine;
use crate::conflict::ConflictResolver;
use crate::disagreement::DisagreementAnalyzer;
use crate::lock::{AcquireOutcome, TaskLockManager};
use crate::review::ReviewFlowEngine;
use crate::store::KeyedStore;
use crate::version::{VersionError, VersionStore};
use aqw_common::config::QualityConfig;
use aqw_common::events::EventBus;
use aqw_common::models::{
    Annotation, ChangeType, Conflict, ConflictStatus, ConflictType, Disagreement, LabelHierarchy,
    Version,
};
use aqw_common::{SharedClock, SystemClock};
use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Coordinator errors; component errors pass through unchanged
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// What one submission produced, beyond the version itself
#[derive(Debug, Serialize)]
pub struct SubmissionOutcome {
    pub version: Version,
    /// Agreement over the task's current labels; None below two
    /// annotators
    pub agreement: Option<f64>,
    /// Present when labels diverge and agreement fell below threshold
    pub disagreement: Option<Disagreement>,
    /// Present when this submission escalated the task into a conflict
    pub conflict: Option<Conflict>,
}

/// Orchestrates the submission pipeline over the quality components
pub struct WorkflowCoordinator {
    versions: VersionStore,
    locks: TaskLockManager,
    agreement: AgreementEngine,
    analyzer: DisagreementAnalyzer,
    conflicts: ConflictResolver,
    reviews: ReviewFlowEngine,
    config: QualityConfig,
    hierarchy: Option<LabelHierarchy>,
    /// Per-task current annotation per annotator
    annotations: KeyedStore<String, BTreeMap<String, Annotation>>,
    /// Tracks the open conflict per task so repeated low-agreement
    /// submissions do not stack duplicates
    open_conflicts: KeyedStore<String, Option<Uuid>>,
}

impl WorkflowCoordinator {
    pub fn new(config: QualityConfig, event_bus: EventBus) -> Self {
        Self::with_clock(config, event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QualityConfig, event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            versions: VersionStore::with_clock(event_bus.clone(), clock.clone()),
            locks: TaskLockManager::with_clock(event_bus.clone(), clock.clone()),
            agreement: AgreementEngine::from_config(&config.agreement),
            analyzer: DisagreementAnalyzer::new(event_bus.clone()),
            conflicts: ConflictResolver::with_clock(event_bus.clone(), clock.clone()),
            reviews: ReviewFlowEngine::with_clock(config.review.clone(), event_bus, clock),
            config,
            hierarchy: None,
            annotations: KeyedStore::new(),
            open_conflicts: KeyedStore::new(),
        }
    }

    /// Project label hierarchy used to grade disagreement severity
    pub fn with_hierarchy(mut self, hierarchy: LabelHierarchy) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Acquire the editing lease for a task with the configured TTL
    pub async fn checkout(&self, task_id: &str, annotator_id: &str) -> AcquireOutcome {
        let ttl = Duration::seconds(self.config.lock.default_ttl_seconds as i64);
        self.locks.acquire(task_id, annotator_id, ttl).await
    }

    /// Submit one annotator's work on a task
    ///
    /// Versions the payload, records the annotation as the annotator's
    /// current one, releases their editing lease, then runs the quality
    /// pass: score agreement over all current annotations, analyze below
    /// threshold, and open a label conflict over the divergent current
    /// versions if the task has none open yet.
    pub async fn submit(
        &self,
        task_id: &str,
        annotator_id: &str,
        data: Value,
        label: &str,
        confidence: f64,
    ) -> Result<SubmissionOutcome, CoordinatorError> {
        let change_type = if self.versions.get_current(task_id, annotator_id).await.is_some() {
            ChangeType::Update
        } else {
            ChangeType::Create
        };
        let version = self
            .versions
            .create_version(task_id, annotator_id, data, change_type, None)
            .await?;

        let current: Vec<Annotation> = {
            let entry = self.annotations.entry(&task_id.to_string()).await;
            let mut registry = entry.lock().await;
            registry.insert(
                annotator_id.to_string(),
                Annotation {
                    annotator_id: annotator_id.to_string(),
                    label: label.to_string(),
                    confidence,
                    version_id: version.id,
                },
            );
            registry.values().cloned().collect()
        };

        // Lease release is best effort; the annotator may never have
        // held one
        self.locks.release(task_id, annotator_id).await;

        let mut outcome = SubmissionOutcome {
            version,
            agreement: None,
            disagreement: None,
            conflict: None,
        };
        if current.len() < 2 {
            return Ok(outcome);
        }

        let labels: Vec<String> = current.iter().map(|a| a.label.clone()).collect();
        let score = self
            .agreement
            .score(&labels, self.config.agreement.default_metric);
        outcome.agreement = Some(score);

        if self.agreement.meets_threshold(score) {
            debug!(task_id = %task_id, score, "Agreement above threshold");
            return Ok(outcome);
        }

        outcome.disagreement = self
            .analyzer
            .analyze(task_id, &current, self.hierarchy.as_ref());
        if outcome.disagreement.is_none() {
            return Ok(outcome);
        }

        let entry = self.open_conflicts.entry(&task_id.to_string()).await;
        let mut open = entry.lock().await;
        let already_open = match *open {
            Some(id) => self
                .conflicts
                .get_conflict(id)
                .await
                .is_some_and(|c| c.status == ConflictStatus::Unresolved),
            None => false,
        };
        if !already_open {
            let version_ids: Vec<Uuid> = current.iter().map(|a| a.version_id).collect();
            let conflict = self
                .conflicts
                .open_conflict(task_id, version_ids, ConflictType::Label)
                .await;
            *open = Some(conflict.id);
            info!(
                task_id = %task_id,
                conflict_id = %conflict.id,
                score,
                "Low agreement escalated to conflict"
            );
            outcome.conflict = Some(conflict);
        }

        Ok(outcome)
    }

    /// Every annotator's current annotation for a task
    pub async fn current_annotations(&self, task_id: &str) -> Vec<Annotation> {
        match self.annotations.get(&task_id.to_string()).await {
            Some(entry) => entry.lock().await.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn locks(&self) -> &TaskLockManager {
        &self.locks
    }

    pub fn agreement(&self) -> &AgreementEngine {
        &self.agreement
    }

    pub fn analyzer(&self) -> &DisagreementAnalyzer {
        &self.analyzer
    }

    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    pub fn reviews(&self) -> &ReviewFlowEngine {
        &self.reviews
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }
}
