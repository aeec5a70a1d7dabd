//! AQW core: collaborative annotation quality workflow
//!
//! The components behind multi-annotator quality control: versioned
//! annotation history, time-leased task locking, inter-annotator
//! agreement scoring, disagreement analysis, conflict resolution and
//! multi-level review. [`coordinator::WorkflowCoordinator`] wires them
//! into the submission pipeline; each component also stands alone.

pub mod agreement;
pub mod conflict;
pub mod coordinator;
pub mod disagreement;
pub mod lock;
pub mod review;
pub mod version;

mod store;

pub use agreement::AgreementEngine;
pub use conflict::{ConflictError, ConflictResolver};
pub use coordinator::{CoordinatorError, SubmissionOutcome, WorkflowCoordinator};
pub use disagreement::DisagreementAnalyzer;
pub use lock::{AcquireOutcome, TaskLockManager};
pub use review::{BatchApproveOutcome, ReviewError, ReviewFlowEngine};
pub use version::{VersionError, VersionStore};
