//! `SchedulerEffects`: the local scheduler's contract, called by
//! the Submission Orchestrator and Job-Update Loop. Scheduling policy and
//! accounting live entirely on the other side of this trait.

use crate::errors::SchedulerError;
use async_trait::async_trait;
use fedmgr_core::{FedJobId, RequeueHold};

/// Outcome of a local allocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocateOutcome {
    /// Allocated and eligible for fan-out.
    Allocated,
    /// Allocated but submitted held (priority 0); fan-out is deferred until
    /// the hold is released.
    AllocatedHeld,
    /// Local allocation itself failed; the orchestrator must not fan out.
    Failed,
}

/// Coarse run-state of a local job, as reported to a syncing peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunState {
    Pending,
    Running,
    Completed,
    Other,
}

/// The local scheduler: allocation, requeue, revocation, and lookups for a
/// federated job. Out of scope for this crate family; only its contract
/// appears here.
#[async_trait]
pub trait SchedulerEffects: Send + Sync {
    /// Allocate the next locally-scoped job id for a new submission.
    async fn next_local_id(&self) -> Result<u32, SchedulerError>;

    /// Instantiate (or re-instantiate) a job from a packed descriptor.
    async fn allocate(
        &self,
        job_id: FedJobId,
        descriptor: &[u8],
        submitter_uid: u32,
    ) -> Result<AllocateOutcome, SchedulerError>;

    /// Apply a job update, used for both `UPDATE` and the
    /// delta-update path of the Submission Orchestrator. Callers retry on
    /// `SchedulerError::DatabaseIndexNotAssigned`.
    async fn update(
        &self,
        job_id: FedJobId,
        descriptor: &[u8],
        submitter_uid: u32,
        requester_uid: u32,
    ) -> Result<(), SchedulerError>;

    /// Finalize a requeue after `matches_requeue_hold` returns true.
    async fn requeue(&self, job_id: FedJobId, state: u32, requester_uid: u32) -> Result<(), SchedulerError>;

    /// Revoke (terminate) the local copy of a job.
    async fn revoke(
        &self,
        job_id: FedJobId,
        is_complete: bool,
        return_code: i32,
        start_time: i64,
    ) -> Result<(), SchedulerError>;

    /// Whether the local scheduler still has a record for this job; used to
    /// drop orphaned `FedJobInfo` entries on snapshot restart.
    async fn find_job(&self, job_id: FedJobId) -> Result<bool, SchedulerError>;

    /// `CANCEL(killMsg, uid)`.
    async fn kill_step(&self, job_id: FedJobId, requester_uid: u32) -> Result<(), SchedulerError>;

    /// Drop the in-memory job record entirely, used after a non-origin
    /// revoke.
    async fn purge_job(&self, job_id: FedJobId) -> Result<(), SchedulerError>;

    /// Run-state and exit code for a job this node is about to report in a
    /// `SEND_JOB_SYNC`. `None` if the job is unknown locally.
    async fn job_run_state(&self, job_id: FedJobId) -> Result<Option<(JobRunState, i32)>, SchedulerError>;

    /// The hold-code classification of the local copy of `job_id`, consulted
    /// by an inbound `COMPLETE`/`REVOKE` to decide whether to finalize a
    /// requeue instead of a terminal revoke. `RequeueHold::Other` if the job
    /// is unknown locally.
    async fn requeue_hold(&self, job_id: FedJobId) -> Result<RequeueHold, SchedulerError>;
}
