//! Domain models for the annotation quality workflow
//!
//! Four independent record families (spec of the core): Versions, Locks,
//! Conflicts (+Votes +Resolutions) and ReviewTasks (+History). External
//! identifiers (task, annotator, reviewer, project) are opaque strings
//! supplied by the surrounding platform; internally minted record ids are
//! UUIDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

// ========================================
// Versions
// ========================================

/// Why a version was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Rollback,
    Merge,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Rollback => "rollback",
            ChangeType::Merge => "merge",
        }
    }
}

/// Soft-delete lifecycle state of a version. Versions are never
/// physically destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// The single current version of its (task, annotator) chain
    Active,
    /// Replaced by a newer version
    Superseded,
    /// Was current when the chain was rolled back past it
    RolledBack,
    /// Soft-deleted; hidden from default listings
    Deleted,
}

/// Immutable snapshot of one annotator's submission for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub task_id: String,
    pub annotator_id: String,
    /// Strictly increasing per (task, annotator), starting at 1
    pub version_number: u64,
    pub data: Value,
    pub parent_version_id: Option<Uuid>,
    pub change_type: ChangeType,
    pub state: VersionState,
    pub created_at: DateTime<Utc>,
}

/// Kind of change to a single top-level field between two versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One top-level field difference between two versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub kind: FieldChangeKind,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

// ========================================
// Locks
// ========================================

/// Time-leased exclusive claim on a task for editing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub task_id: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// Expired leases are reclaimable; expiry is evaluated lazily at
    /// acquire time, there is no background sweep.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ========================================
// Annotations and disagreement
// ========================================

/// One annotator's current label for a task, with self-reported
/// confidence in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub annotator_id: String,
    pub label: String,
    pub confidence: f64,
    pub version_id: Uuid,
}

/// Severity tier of an inter-annotator disagreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Minor => write!(f, "minor"),
            Severity::Major => write!(f, "major"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Derived description of a disagreement over a task's current labels.
/// Computed on demand, never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub task_id: String,
    pub severity: Severity,
    /// Continuous severity score in [0, 1]; even splits score higher
    pub score: f64,
    pub label_counts: BTreeMap<String, usize>,
    /// Rule-based advisory text; never used in control-flow decisions
    pub probable_causes: Vec<String>,
    /// Rule-based advisory text; never used in control-flow decisions
    pub suggested_resolutions: Vec<String>,
}

/// Optional project-supplied mapping of label -> related labels, used to
/// distinguish minor from major two-label disagreements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelHierarchy(pub BTreeMap<String, Vec<String>>);

impl LabelHierarchy {
    /// Whether two labels are related in either direction
    pub fn related(&self, a: &str, b: &str) -> bool {
        let forward = self.0.get(a).is_some_and(|v| v.iter().any(|l| l == b));
        let backward = self.0.get(b).is_some_and(|v| v.iter().any(|l| l == a));
        forward || backward
    }
}

// ========================================
// Conflicts, votes, resolutions
// ========================================

/// What kind of disagreement was escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// Annotators assigned different labels
    Label,
    /// Annotators disagree on attributes of an agreed label
    Attribute,
    /// Annotators disagree on the structure of the annotation itself
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// A disagreement escalated for explicit resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Uuid,
    pub task_id: String,
    pub version_ids: Vec<Uuid>,
    pub conflict_type: ConflictType,
    pub status: ConflictStatus,
    pub opened_at: DateTime<Utc>,
}

/// One voter's choice on a conflict; unique per (conflict, voter)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub conflict_id: Uuid,
    pub voter_id: String,
    pub choice: String,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    Vote,
    Expert,
}

/// The durable outcome of a conflict. Created exactly once per conflict;
/// the field set is a stability contract read by external reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: Uuid,
    pub method: ResolutionMethod,
    pub result: String,
    /// Present for vote resolutions, for audit
    pub vote_counts: Option<BTreeMap<String, usize>>,
    /// Present for expert resolutions
    pub expert_id: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

// ========================================
// Review
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One annotation's passage through multi-level review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTask {
    pub id: Uuid,
    pub annotation_id: String,
    /// 1-based; never exceeds max_level
    pub current_level: u8,
    pub max_level: u8,
    pub status: ReviewStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewTask {
    /// Whether the review has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ReviewStatus::Approved | ReviewStatus::Rejected)
    }
}

/// Reviewer action recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    AutoApprove,
    Resubmit,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::AutoApprove => "auto_approve",
            ReviewAction::Resubmit => "resubmit",
        }
    }
}

/// Append-only audit record; never mutated or deleted. The field set is
/// a stability contract read by external reporting and billing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    pub review_task_id: Uuid,
    pub reviewer_id: String,
    pub action: ReviewAction,
    /// The level resulting from the action
    pub level: u8,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ========================================
// Agreement metrics
// ========================================

/// Inter-annotator agreement metric. Metric choice is a caller
/// parameter because reports compare methods side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementMetric {
    PercentAgreement,
    CohensKappa,
    FleissKappa,
    KrippendorffsAlpha,
    ScottsPi,
}

impl AgreementMetric {
    /// All metrics, in report order
    pub const ALL: [AgreementMetric; 5] = [
        AgreementMetric::PercentAgreement,
        AgreementMetric::CohensKappa,
        AgreementMetric::FleissKappa,
        AgreementMetric::KrippendorffsAlpha,
        AgreementMetric::ScottsPi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementMetric::PercentAgreement => "percent_agreement",
            AgreementMetric::CohensKappa => "cohens_kappa",
            AgreementMetric::FleissKappa => "fleiss_kappa",
            AgreementMetric::KrippendorffsAlpha => "krippendorffs_alpha",
            AgreementMetric::ScottsPi => "scotts_pi",
        }
    }
}

impl std::fmt::Display for AgreementMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry_boundary() {
        let now = Utc::now();
        let lock = Lock {
            task_id: "t1".to_string(),
            holder_id: "a1".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(60),
        };
        assert!(!lock.is_expired(now));
        assert!(!lock.is_expired(now + chrono::Duration::seconds(59)));
        // Expiry boundary is inclusive
        assert!(lock.is_expired(now + chrono::Duration::seconds(60)));
        assert!(lock.is_expired(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_label_hierarchy_related_symmetric() {
        let mut map = BTreeMap::new();
        map.insert("positive".to_string(), vec!["slightly_positive".to_string()]);
        let hierarchy = LabelHierarchy(map);

        assert!(hierarchy.related("positive", "slightly_positive"));
        assert!(hierarchy.related("slightly_positive", "positive"));
        assert!(!hierarchy.related("positive", "negative"));
    }

    #[test]
    fn test_version_state_serialization() {
        let json = serde_json::to_string(&VersionState::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");

        let state: VersionState = serde_json::from_str("\"superseded\"").unwrap();
        assert_eq!(state, VersionState::Superseded);
    }

    #[test]
    fn test_agreement_metric_serialization() {
        let json = serde_json::to_string(&AgreementMetric::CohensKappa).unwrap();
        assert_eq!(json, "\"cohens_kappa\"");

        for metric in AgreementMetric::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            let back: AgreementMetric = serde_json::from_str(&json).unwrap();
            assert_eq!(back, metric);
        }
    }

    #[test]
    fn test_review_task_terminal_states() {
        let now = Utc::now();
        let mut task = ReviewTask {
            id: Uuid::new_v4(),
            annotation_id: "ann-1".to_string(),
            current_level: 1,
            max_level: 2,
            status: ReviewStatus::Pending,
            submitted_at: now,
            updated_at: now,
        };
        assert!(!task.is_terminal());
        task.status = ReviewStatus::Approved;
        assert!(task.is_terminal());
        task.status = ReviewStatus::Rejected;
        assert!(task.is_terminal());
    }

    #[test]
    fn test_resolution_audit_fields_serialize() {
        let mut counts = BTreeMap::new();
        counts.insert("A".to_string(), 2usize);
        counts.insert("B".to_string(), 1usize);

        let resolution = Resolution {
            conflict_id: Uuid::new_v4(),
            method: ResolutionMethod::Vote,
            result: "A".to_string(),
            vote_counts: Some(counts),
            expert_id: None,
            resolved_at: Utc::now(),
        };

        let json = serde_json::to_string(&resolution).unwrap();
        assert!(json.contains("\"method\":\"vote\""));
        assert!(json.contains("\"vote_counts\""));
        assert!(json.contains("\"result\":\"A\""));
    }
}
