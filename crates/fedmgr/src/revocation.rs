//! Revocation: tearing down sibling copies once a winner is
//! known, or terminating a job outright.

use crate::error::FedMgrError;
use crate::job_registry::JobRegistry;
use crate::peer_table::{PeerTable, PendingRpc};
use fedmgr_core::{ClusterId, FedJobId, RequeueHold, SiblingMask};
use fedmgr_messages::{SibMsg, SibMsgType};
use fedmgr_transport::SchedulerEffects;

/// `Revoke(job, isComplete, rc, startTime)`.
///
/// `already_completed` and `requeue_hold` are supplied by the caller (the
/// Job-Update Loop handler), which already has the context needed to decide
/// them; this function only applies the resulting state transition.
pub async fn revoke<S: SchedulerEffects>(
    registry: &JobRegistry,
    scheduler: &S,
    job_id: FedJobId,
    local: ClusterId,
    is_complete: bool,
    rc: i32,
    start_time: i64,
    already_completed: bool,
    requeue_hold: RequeueHold,
) -> Result<(), FedMgrError> {
    if already_completed {
        return Ok(());
    }

    if fedmgr_core::FedJobInfo::matches_requeue_hold(requeue_hold) {
        scheduler.requeue(job_id, 0, 0).await?;
        return Ok(());
    }

    scheduler.revoke(job_id, is_complete, rc, start_time).await?;

    // At non-origin peers the in-memory scheduler record is explicitly
    // purged on revoke; at the origin the `FedJobInfo` is still destroyed
    // here, since this is the terminal completion point for the job.
    let origin = job_id.origin().ok();
    if origin != Some(local) {
        scheduler.purge_job(job_id).await?;
    }
    registry.remove(job_id).await;

    Ok(())
}

/// `RevokeSiblings(jobId, except, mask, startTime)`: walks the bitmask
/// ascending, skipping `local` and `except`, enqueueing a `REVOKE` RPC
/// (class `COMPLETE`) per selected peer.
pub async fn revoke_siblings(
    peer_table: &PeerTable,
    job_id: FedJobId,
    mask: SiblingMask,
    local: ClusterId,
    except: Option<ClusterId>,
    rc: i32,
    start_time: i64,
) {
    for peer in mask.iter_ascending() {
        if peer == local || Some(peer) == except {
            continue;
        }
        let envelope = SibMsg::revoke(job_id, rc, start_time);
        let Ok(bytes) = envelope.to_bytes() else {
            tracing::warn!(job = %job_id, peer = %peer, "failed to encode revoke envelope");
            continue;
        };
        let rpc = PendingRpc::new(job_id, SibMsgType::Revoke, bytes);
        peer_table.enqueue(peer, rpc).await;
    }
}
