//! The job state machine transition table.
//!
//! All status changes in the system funnel through [`check_transition`]
//! (in-process) or the equivalent conditional SQL update (persisted).
//! Illegal transitions (duplicate webhooks, late poll results, stale
//! workers) are rejected and logged, never silently coerced.

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::JobStatus;

/// The states from which `target` may legally be entered.
pub fn allowed_predecessors(target: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match target {
        Queued => &[],
        Submitting => &[Queued],
        AwaitingExternal => &[Submitting],
        Parsed => &[AwaitingExternal, Submitting],
        Chunking => &[Parsed],
        Chunked => &[Chunking],
        Embedding => &[Chunked],
        Complete => &[Embedding],
        // Failure and cancellation are reachable from any non-terminal state;
        // encoded as "everything", filtered by is_terminal in can_transition.
        Failed => &[
            Queued,
            Submitting,
            AwaitingExternal,
            Parsed,
            Chunking,
            Chunked,
            Embedding,
        ],
        Cancelled => &[
            Queued,
            Submitting,
            AwaitingExternal,
            Parsed,
            Chunking,
            Chunked,
            Embedding,
        ],
    }
}

/// Whether `from -> to` is a legal transition.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    allowed_predecessors(to).contains(&from)
}

/// Validate a transition, logging and returning an error if illegal.
pub fn check_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        warn!(from = %from, to = %to, "rejected illegal job transition");
        Err(Error::IllegalTransition { from, to })
    }
}

/// Statuses a worker may claim to run the next pipeline stage.
///
/// `awaiting_external` is included so the poll loop can resume jobs
/// whose webhook never arrived; a crash after `chunked` resumes at the
/// embedding stage rather than re-running chunking.
pub const CLAIMABLE: &[JobStatus] = &[
    JobStatus::Queued,
    JobStatus::AwaitingExternal,
    JobStatus::Parsed,
    JobStatus::Chunked,
];

/// The in-progress status a claimed job is moved to for each claimable
/// status, forming the compare-and-swap pair that prevents double-claim.
pub fn claim_target(claimed_from: JobStatus) -> Option<JobStatus> {
    match claimed_from {
        JobStatus::Queued => Some(JobStatus::Submitting),
        // awaiting_external is claimed in place: resolution itself is the
        // CAS (awaiting_external -> parsed), so polling and webhooks race
        // safely.
        JobStatus::AwaitingExternal => Some(JobStatus::AwaitingExternal),
        JobStatus::Parsed => Some(JobStatus::Chunking),
        JobStatus::Chunked => Some(JobStatus::Embedding),
        _ => None,
    }
}

/// Where a job lands when a stage fails transiently and remains
/// retryable: the last *completed* state, so the retry resumes there
/// instead of re-running finished work.
pub fn rollback_on_retry(in_progress: JobStatus) -> JobStatus {
    match in_progress {
        JobStatus::Submitting => JobStatus::Queued,
        JobStatus::AwaitingExternal => JobStatus::AwaitingExternal,
        JobStatus::Chunking => JobStatus::Parsed,
        JobStatus::Embedding => JobStatus::Chunked,
        other => other,
    }
}
