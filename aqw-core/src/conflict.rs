//! Conflict resolver
//!
//! Turns an unresolved disagreement into a durable Resolution, either by
//! majority vote or by expert override. A conflict resolves exactly once:
//! status flips to resolved in the same per-conflict critical section
//! that stores the Resolution, so concurrent resolve calls cannot both
//! succeed.

use crate::store::KeyedStore;
use aqw_common::events::{AqwEvent, EventBus};
use aqw_common::models::{
    Conflict, ConflictStatus, ConflictType, Resolution, ResolutionMethod, Vote,
};
use aqw_common::{SharedClock, SystemClock};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Conflict resolver errors
///
/// DuplicateVote, AlreadyResolved and VoteTie are contention-class:
/// expected under normal operation and recoverable by the caller.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("conflict {0} not found")]
    NotFound(Uuid),

    /// One vote per voter per conflict; a second vote is rejected, not
    /// overwritten
    #[error("voter {voter_id} already voted on conflict {conflict_id}")]
    DuplicateVote { conflict_id: Uuid, voter_id: String },

    #[error("conflict {0} is already resolved")]
    AlreadyResolved(Uuid),

    /// A tied vote is never broken silently; it requires expert
    /// resolution
    #[error("vote on conflict {conflict_id} is tied: {counts:?}")]
    VoteTie {
        conflict_id: Uuid,
        counts: BTreeMap<String, usize>,
    },

    #[error("conflict {0} has no votes to tally")]
    NoVotes(Uuid),
}

struct ConflictRecord {
    conflict: Conflict,
    votes: Vec<Vote>,
    resolution: Option<Resolution>,
}

/// Owns Conflicts, Votes and Resolutions
pub struct ConflictResolver {
    records: KeyedStore<Uuid, ConflictRecord>,
    clock: SharedClock,
    event_bus: EventBus,
}

impl ConflictResolver {
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_clock(event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            records: KeyedStore::new(),
            clock,
            event_bus,
        }
    }

    /// Escalate a disagreement into a conflict requiring explicit
    /// resolution
    pub async fn open_conflict(
        &self,
        task_id: &str,
        version_ids: Vec<Uuid>,
        conflict_type: ConflictType,
    ) -> Conflict {
        let conflict = Conflict {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            version_ids,
            conflict_type,
            status: ConflictStatus::Unresolved,
            opened_at: self.clock.now(),
        };
        let record = ConflictRecord {
            conflict: conflict.clone(),
            votes: Vec::new(),
            resolution: None,
        };
        self.records.insert(conflict.id, record).await;

        info!(
            conflict_id = %conflict.id,
            task_id = %task_id,
            "Conflict opened"
        );
        self.event_bus.emit_lossy(AqwEvent::ConflictOpened {
            conflict_id: conflict.id,
            task_id: task_id.to_string(),
            conflict_type,
            timestamp: conflict.opened_at,
        });

        conflict
    }

    /// Cast one voter's choice on an open conflict
    pub async fn cast_vote(
        &self,
        conflict_id: Uuid,
        voter_id: &str,
        choice: &str,
    ) -> Result<Vote, ConflictError> {
        let entry = self
            .records
            .get(&conflict_id)
            .await
            .ok_or(ConflictError::NotFound(conflict_id))?;
        let mut record = entry.lock().await;

        if record.resolution.is_some() {
            return Err(ConflictError::AlreadyResolved(conflict_id));
        }
        if record.votes.iter().any(|v| v.voter_id == voter_id) {
            return Err(ConflictError::DuplicateVote {
                conflict_id,
                voter_id: voter_id.to_string(),
            });
        }

        let vote = Vote {
            conflict_id,
            voter_id: voter_id.to_string(),
            choice: choice.to_string(),
            cast_at: self.clock.now(),
        };
        record.votes.push(vote.clone());

        debug!(conflict_id = %conflict_id, voter_id = %voter_id, "Vote cast");
        self.event_bus.emit_lossy(AqwEvent::VoteCast {
            conflict_id,
            voter_id: voter_id.to_string(),
            timestamp: vote.cast_at,
        });

        Ok(vote)
    }

    /// Resolve by majority of the cast votes
    ///
    /// Ties are reported as an error for expert resolution, never broken
    /// silently.
    pub async fn resolve_by_vote(&self, conflict_id: Uuid) -> Result<Resolution, ConflictError> {
        let entry = self
            .records
            .get(&conflict_id)
            .await
            .ok_or(ConflictError::NotFound(conflict_id))?;
        let mut record = entry.lock().await;

        if record.resolution.is_some() {
            return Err(ConflictError::AlreadyResolved(conflict_id));
        }
        if record.votes.is_empty() {
            return Err(ConflictError::NoVotes(conflict_id));
        }

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for vote in &record.votes {
            *counts.entry(vote.choice.clone()).or_insert(0) += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        let winners: Vec<&String> = counts
            .iter()
            .filter(|(_, &c)| c == top)
            .map(|(choice, _)| choice)
            .collect();
        if winners.len() > 1 {
            warn!(
                conflict_id = %conflict_id,
                "Vote tied; expert resolution required"
            );
            return Err(ConflictError::VoteTie {
                conflict_id,
                counts,
            });
        }
        let result = winners[0].clone();

        let resolution = Resolution {
            conflict_id,
            method: ResolutionMethod::Vote,
            result: result.clone(),
            vote_counts: Some(counts),
            expert_id: None,
            resolved_at: self.clock.now(),
        };
        record.resolution = Some(resolution.clone());
        record.conflict.status = ConflictStatus::Resolved;

        info!(conflict_id = %conflict_id, result = %result, "Conflict resolved by vote");
        self.event_bus.emit_lossy(AqwEvent::ConflictResolved {
            conflict_id,
            method: ResolutionMethod::Vote,
            result,
            timestamp: resolution.resolved_at,
        });

        Ok(resolution)
    }

    /// Resolve by expert override, bypassing any votes
    pub async fn resolve_by_expert(
        &self,
        conflict_id: Uuid,
        expert_id: &str,
        result: &str,
    ) -> Result<Resolution, ConflictError> {
        let entry = self
            .records
            .get(&conflict_id)
            .await
            .ok_or(ConflictError::NotFound(conflict_id))?;
        let mut record = entry.lock().await;

        if record.resolution.is_some() {
            return Err(ConflictError::AlreadyResolved(conflict_id));
        }

        let resolution = Resolution {
            conflict_id,
            method: ResolutionMethod::Expert,
            result: result.to_string(),
            vote_counts: None,
            expert_id: Some(expert_id.to_string()),
            resolved_at: self.clock.now(),
        };
        record.resolution = Some(resolution.clone());
        record.conflict.status = ConflictStatus::Resolved;

        info!(
            conflict_id = %conflict_id,
            expert_id = %expert_id,
            result = %result,
            "Conflict resolved by expert"
        );
        self.event_bus.emit_lossy(AqwEvent::ConflictResolved {
            conflict_id,
            method: ResolutionMethod::Expert,
            result: result.to_string(),
            timestamp: resolution.resolved_at,
        });

        Ok(resolution)
    }

    pub async fn get_conflict(&self, conflict_id: Uuid) -> Option<Conflict> {
        let entry = self.records.get(&conflict_id).await?;
        let record = entry.lock().await;
        Some(record.conflict.clone())
    }

    pub async fn get_resolution(&self, conflict_id: Uuid) -> Option<Resolution> {
        let entry = self.records.get(&conflict_id).await?;
        let record = entry.lock().await;
        record.resolution.clone()
    }

    pub async fn votes(&self, conflict_id: Uuid) -> Vec<Vote> {
        match self.records.get(&conflict_id).await {
            Some(entry) => entry.lock().await.votes.clone(),
            None => Vec::new(),
        }
    }
}
