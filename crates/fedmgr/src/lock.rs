//! The Cluster Lock Protocol: the origin is the sole arbiter
//! of which peer gets to start a job. `acquire`/`release` are invoked from
//! the synchronous send/recv path that bypasses the agent queue.

use crate::error::FedMgrError;
use crate::job_registry::JobRegistry;
use fedmgr_core::{ClusterId, FedJobId};

/// `Lock(jobId, by peer P)`.
pub async fn acquire(
    registry: &JobRegistry,
    job_id: FedJobId,
    by: ClusterId,
    now: i64,
    stale_secs: i64,
) -> Result<(), FedMgrError> {
    let outcome = registry
        .with_mut(job_id, |job| {
            if pending_updates_within(job, now, stale_secs) {
                return Err(FedMgrError::lock_denied("job has updates in flight"));
            }
            match job.cluster_lock {
                None => {
                    job.cluster_lock = Some(by);
                    Ok(())
                }
                Some(holder) => Err(FedMgrError::lock_denied(format!("already locked by {holder}"))),
            }
        })
        .await;

    match outcome {
        Some(result) => result,
        None => Err(FedMgrError::policy(format!("unknown job {job_id}"))),
    }
}

/// `Unlock(jobId, by peer P)`: requires `ClusterLock = P`; mismatch is
/// logged and rejected.
pub async fn release(registry: &JobRegistry, job_id: FedJobId, by: ClusterId) -> Result<(), FedMgrError> {
    let outcome = registry
        .with_mut(job_id, |job| match job.cluster_lock {
            Some(holder) if holder == by => {
                job.cluster_lock = None;
                Ok(())
            }
            Some(holder) => {
                tracing::warn!(job = %job_id, requester = %by, holder = %holder, "unlock rejected: mismatched owner");
                Err(FedMgrError::lock_denied(format!(
                    "unlock by {by} rejected: locked by {holder}"
                )))
            }
            None => Err(FedMgrError::lock_denied("job is not locked")),
        })
        .await;

    match outcome {
        Some(result) => result,
        None => Err(FedMgrError::policy(format!("unknown job {job_id}"))),
    }
}

/// `Start(jobId, by peer P, startTime)`'s precondition check: `ClusterLock =
/// P ≠ 0`. The state mutation itself — setting
/// `SiblingsActive = {P}` and revoking the rest — is the Job-Update Loop's
/// responsibility (`job_update_loop::handle_start`), since it also needs the
/// peer table to fan out revokes.
pub fn validate_start(cluster_lock: Option<ClusterId>, by: ClusterId) -> Result<(), FedMgrError> {
    match cluster_lock {
        Some(holder) if holder == by => Ok(()),
        _ => Err(FedMgrError::lock_denied(format!("{by} does not hold the lock"))),
    }
}

fn pending_updates_within(job: &fedmgr_core::FedJobInfo, now: i64, stale_secs: i64) -> bool {
    // fedmgr_core::UPDATE_STALE_SECONDS is the default; callers may tune the
    // window via config, so re-derive rather than calling has_pending_updates
    // directly when stale_secs differs from the compiled-in constant.
    if stale_secs == fedmgr_core::UPDATE_STALE_SECONDS {
        job.has_pending_updates(now)
    } else {
        (1..=fedmgr_core::MAX_CLUSTERS).any(|i| {
            job.updating_sibs[i] > 0
                && job.updating_time[i].map(|t| now - t <= stale_secs).unwrap_or(false)
        })
    }
}
