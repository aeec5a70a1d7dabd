//! Disagreement analyzer
//!
//! Classifies and scores how badly a task's current annotations diverge.
//! Disagreements are derived on demand from the annotations handed in by
//! the caller; nothing is stored here. Cause and resolution text is
//! heuristic advisory output for reviewers and never drives control flow
//! elsewhere.

use aqw_common::events::{AqwEvent, EventBus};
use aqw_common::models::{Annotation, Disagreement, LabelHierarchy, Severity};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::debug;

/// Confidence below which an annotation is flagged as a likely cause
const LOW_CONFIDENCE: f64 = 0.5;

pub struct DisagreementAnalyzer {
    event_bus: EventBus,
}

impl DisagreementAnalyzer {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Analyze the current annotations for a task
    ///
    /// Returns None when all labels are identical. Otherwise classifies
    /// the disagreement: two distinct labels related in the hierarchy are
    /// minor, two unrelated labels are major, three or more distinct
    /// labels are critical. The continuous score rewards even splits.
    pub fn analyze(
        &self,
        task_id: &str,
        annotations: &[Annotation],
        hierarchy: Option<&LabelHierarchy>,
    ) -> Option<Disagreement> {
        let mut label_counts: BTreeMap<String, usize> = BTreeMap::new();
        for annotation in annotations {
            *label_counts.entry(annotation.label.clone()).or_insert(0) += 1;
        }
        if label_counts.len() <= 1 {
            return None;
        }

        let n = annotations.len() as f64;
        let distinct = label_counts.len();
        let modal = label_counts.values().copied().max().unwrap_or(0) as f64;
        let max_label_share = modal / n;
        let score =
            ((distinct as f64 - 1.0) / n + (1.0 - max_label_share) * 0.5).min(1.0);

        let severity = if distinct >= 3 {
            Severity::Critical
        } else {
            let mut labels = label_counts.keys();
            let (a, b) = (labels.next().unwrap(), labels.next().unwrap());
            if hierarchy.is_some_and(|h| h.related(a, b)) {
                Severity::Minor
            } else {
                Severity::Major
            }
        };

        let disagreement = Disagreement {
            task_id: task_id.to_string(),
            severity,
            score,
            probable_causes: probable_causes(annotations, distinct),
            suggested_resolutions: suggested_resolutions(severity),
            label_counts,
        };

        debug!(
            task_id = %task_id,
            severity = %severity,
            score,
            "Disagreement detected"
        );
        self.event_bus.emit_lossy(AqwEvent::DisagreementDetected {
            task_id: task_id.to_string(),
            severity,
            score,
            timestamp: Utc::now(),
        });

        Some(disagreement)
    }
}

fn probable_causes(annotations: &[Annotation], distinct: usize) -> Vec<String> {
    let mut causes = Vec::new();

    let low_confidence: Vec<&str> = annotations
        .iter()
        .filter(|a| a.confidence < LOW_CONFIDENCE)
        .map(|a| a.annotator_id.as_str())
        .collect();
    if !low_confidence.is_empty() {
        causes.push(format!(
            "Low annotator confidence ({}) suggests the item itself is hard to judge",
            low_confidence.join(", ")
        ));
    }

    if distinct > 2 {
        causes.push(
            "More than two distinct labels suggests annotators interpret the task differently"
                .to_string(),
        );
    }

    if causes.is_empty() {
        causes.push("Likely guideline ambiguity for this label pair".to_string());
    }
    causes
}

fn suggested_resolutions(severity: Severity) -> Vec<String> {
    match severity {
        Severity::Minor => vec![
            "Resolve by majority vote; labels are closely related".to_string(),
        ],
        Severity::Major => vec![
            "Resolve by majority vote, escalating ties to an expert".to_string(),
            "Review the guideline section covering this label pair".to_string(),
        ],
        Severity::Critical => vec![
            "Escalate directly to expert resolution".to_string(),
            "Clarify annotation guidelines before more work on similar items".to_string(),
        ],
    }
}
