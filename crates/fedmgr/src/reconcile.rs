//! Reconciliation on peer reconnect — the most intricate piece of the
//! manager. Two halves: the sender assembling `SEND_JOB_SYNC` / `SYNC`, and
//! the receiver walking its own table against the peer's reported state.

use crate::error::FedMgrError;
use crate::job_registry::JobRegistry;
use crate::peer_table::{PeerTable, PendingRpc};
use crate::revocation;
use fedmgr_core::{ClusterId, FedJobId, RequeueHold, SiblingMask};
use fedmgr_messages::{SibMsg, SibMsgType, SyncJobRecord, SyncJobRunState};
use fedmgr_transport::{JobRunState, SchedulerEffects};
use std::collections::HashMap;

/// `SEND_JOB_SYNC(peer)`: build and enqueue a `SYNC` envelope listing every
/// job we believe is live and relevant to `peer` — originated at us or at
/// `peer`, not yet complete, submitted before `sync_time`.
pub async fn send_job_sync<S: SchedulerEffects>(
    registry: &JobRegistry,
    scheduler: &S,
    peer_table: &PeerTable,
    local: ClusterId,
    peer: ClusterId,
    sync_time: i64,
) -> Result<(), FedMgrError> {
    let mut records = Vec::new();
    for id in registry.all_ids().await {
        let Some(job) = registry.get(id).await else { continue };
        let origin = job.origin().ok();
        if origin != Some(local) && origin != Some(peer) {
            continue;
        }
        let Some((state, exit_code)) = scheduler.job_run_state(id).await? else {
            continue;
        };
        if state == JobRunState::Completed {
            continue;
        }
        records.push(SyncJobRecord {
            job_id: id,
            state: to_wire_state(state),
            exit_code,
        });
    }

    let envelope = SibMsg::sync(local, sync_time, &records)?;
    let bytes = envelope.to_bytes()?;
    let rpc = PendingRpc::new(FedJobId::from_raw(0), SibMsgType::Sync, bytes);
    peer_table.enqueue(peer, rpc).await;
    Ok(())
}

fn to_wire_state(state: JobRunState) -> SyncJobRunState {
    match state {
        JobRunState::Pending => SyncJobRunState::Pending,
        JobRunState::Running => SyncJobRunState::Running,
        JobRunState::Completed => SyncJobRunState::Completed,
        JobRunState::Other => SyncJobRunState::Other,
    }
}

/// Receiver side of `SYNC`: walks every local job relevant to `from` against
/// `from`'s reported list, applying the reconciliation table below:
///
/// | origin | found on `from` | action |
/// |---|---|---|
/// | `from` | absent, or present-and-completed | flush our copy (peer dropped or finished it while we were split) |
/// | `from` | present, not completed | no-op |
/// | `local` | absent, unlocked | resubmit to `from` (restore missing sibling) |
/// | `local` | absent, locked by `from` | treat as completed (peer lost the work silently) |
/// | `local` | absent, locked by a third peer | no-op (normal rebalance) |
/// | `local` | present, locked by `from`, reported completed | revoke the origin tracking copy with the reported exit code |
/// | `local` | present, unlocked, sibling bit missing | repair: set the sibling bit |
/// | `local` | present, locked by someone other than `from` | re-revoke `from`'s copy |
pub async fn handle_sync<S: SchedulerEffects>(
    registry: &JobRegistry,
    scheduler: &S,
    peer_table: &PeerTable,
    local: ClusterId,
    from: ClusterId,
    remote_jobs: &[SyncJobRecord],
    _sync_time: i64,
) -> Result<(), FedMgrError> {
    let remote: HashMap<FedJobId, &SyncJobRecord> = remote_jobs.iter().map(|r| (r.job_id, r)).collect();

    for id in registry.all_ids().await {
        let Some(job) = registry.get(id).await else { continue };
        let origin = job.origin().ok();
        let sibling_bit = SiblingMask::single(from);
        let relevant = origin == Some(from) || (origin == Some(local) && job.siblings_viable.contains(from));
        if !relevant {
            continue;
        }

        let found = remote.get(&id).copied();

        if origin == Some(from) {
            let peer_done = found.map(|r| r.state == SyncJobRunState::Completed).unwrap_or(true);
            if peer_done {
                revocation::revoke(
                    registry,
                    scheduler,
                    id,
                    local,
                    false,
                    0,
                    0,
                    false,
                    RequeueHold::Other,
                )
                .await?;
            }
            continue;
        }

        // origin == Some(local): we originated this job.
        match found {
            None => match job.cluster_lock {
                None => resend_to_peer(peer_table, from, id, job.siblings_viable).await,
                Some(holder) if holder == from => {
                    revocation::revoke(
                        registry,
                        scheduler,
                        id,
                        local,
                        true,
                        0,
                        0,
                        false,
                        RequeueHold::Other,
                    )
                    .await?;
                }
                Some(_other) => {
                    // Locked by a third peer; the sibling on `from` either
                    // never started or already finished before `from`
                    // dropped. Normal rebalance, no action.
                }
            },
            Some(remote_job) => match job.cluster_lock {
                Some(holder) if holder == from => {
                    if remote_job.state == SyncJobRunState::Completed {
                        revocation::revoke(
                            registry,
                            scheduler,
                            id,
                            local,
                            true,
                            remote_job.exit_code,
                            0,
                            false,
                            RequeueHold::Other,
                        )
                        .await?;
                    }
                }
                Some(_other) => {
                    revocation::revoke_siblings(peer_table, id, sibling_bit, local, None, 0, 0).await;
                }
                None => {
                    if !job.siblings_active.contains(from) {
                        registry
                            .with_mut(id, |job| job.siblings_active = job.siblings_active.with(from))
                            .await;
                    }
                }
            },
        }
    }

    Ok(())
}

async fn resend_to_peer(peer_table: &PeerTable, peer: ClusterId, job_id: FedJobId, fed_siblings: SiblingMask) {
    let envelope = SibMsg::submit(true, job_id, 0, fed_siblings, 0, Vec::new());
    let Ok(bytes) = envelope.to_bytes() else {
        tracing::warn!(job = %job_id, peer = %peer, "failed to encode resync submit");
        return;
    };
    let rpc = PendingRpc::new(job_id, SibMsgType::SubmitBatch, bytes);
    peer_table.enqueue(peer, rpc).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_table::PeerRecord;
    use fedmgr_core::FedJobInfo;
    use fedmgr_transport::fakes::FakeScheduler;

    #[tokio::test]
    async fn send_job_sync_lists_jobs_relevant_to_peer() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        let other = ClusterId::new(3).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let mine = FedJobId::new(local, 1).unwrap();
        let theirs = FedJobId::new(peer, 1).unwrap();
        let unrelated = FedJobId::new(other, 1).unwrap();
        registry.insert(FedJobInfo::new(mine)).await;
        registry.insert(FedJobInfo::new(theirs)).await;
        registry.insert(FedJobInfo::new(unrelated)).await;
        scheduler.set_run_state(mine, fedmgr_transport::JobRunState::Running, 0);
        scheduler.set_run_state(theirs, fedmgr_transport::JobRunState::Running, 0);
        scheduler.set_run_state(unrelated, fedmgr_transport::JobRunState::Running, 0);

        send_job_sync(&registry, &scheduler, &peer_table, local, peer, 1000).await.unwrap();

        let record = peer_table.get(peer).await.unwrap();
        let guard = record.lock().await;
        assert_eq!(guard.pending.len(), 1);
        let envelope = SibMsg::from_bytes(&guard.pending[0].buffer).unwrap();
        let ids: Vec<_> = envelope.sync_job_records().unwrap().into_iter().map(|r| r.job_id).collect();
        assert!(ids.contains(&mine));
        assert!(ids.contains(&theirs));
        assert!(!ids.contains(&unrelated));
    }

    #[tokio::test]
    async fn handle_sync_flushes_copy_dropped_at_origin() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let origin_peer = ClusterId::new(2).unwrap();

        let job_id = FedJobId::new(origin_peer, 1).unwrap();
        registry.insert(FedJobInfo::new(job_id)).await;

        handle_sync(&registry, &scheduler, &peer_table, local, origin_peer, &[], 1000)
            .await
            .unwrap();

        assert!(!registry.contains(job_id).await);
    }

    #[tokio::test]
    async fn handle_sync_resubmits_job_missing_and_unlocked() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(peer);
        job.siblings_active = SiblingMask::from_ids([local, peer]);
        registry.insert(job).await;

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &[], 1000)
            .await
            .unwrap();

        let record = peer_table.get(peer).await.unwrap();
        assert_eq!(record.lock().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn handle_sync_treats_job_as_completed_when_missing_and_locked_by_peer() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(peer);
        job.cluster_lock = Some(peer);
        registry.insert(job).await;

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &[], 1000)
            .await
            .unwrap();

        assert!(scheduler.calls.lock().unwrap().iter().any(|c| c.starts_with("revoke")));
    }

    #[tokio::test]
    async fn handle_sync_revokes_origin_tracker_when_remote_reports_complete() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(peer);
        job.cluster_lock = Some(peer);
        registry.insert(job).await;

        let remote = vec![SyncJobRecord {
            job_id,
            state: SyncJobRunState::Completed,
            exit_code: 7,
        }];

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &remote, 1000)
            .await
            .unwrap();

        assert!(scheduler.calls.lock().unwrap().iter().any(|c| c.starts_with("revoke")));
    }

    #[tokio::test]
    async fn handle_sync_repairs_missing_sibling_bit() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(peer);
        job.siblings_active = SiblingMask::single(local);
        registry.insert(job).await;

        let remote = vec![SyncJobRecord {
            job_id,
            state: SyncJobRunState::Running,
            exit_code: 0,
        }];

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &remote, 1000)
            .await
            .unwrap();

        let after = registry.get(job_id).await.unwrap();
        assert!(after.siblings_active.contains(peer));
    }

    #[tokio::test]
    async fn handle_sync_re_revokes_when_locked_by_a_different_peer() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        let third = ClusterId::new(3).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::from_ids([peer, third]);
        job.cluster_lock = Some(third);
        registry.insert(job).await;

        let remote = vec![SyncJobRecord {
            job_id,
            state: SyncJobRunState::Running,
            exit_code: 0,
        }];

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &remote, 1000)
            .await
            .unwrap();

        let record = peer_table.get(peer).await.unwrap();
        assert_eq!(record.lock().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn handle_sync_leaves_agreeing_jobs_untouched() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();

        let job_id = FedJobId::new(peer, 1).unwrap();
        registry.insert(FedJobInfo::new(job_id)).await;

        let remote = vec![SyncJobRecord {
            job_id,
            state: SyncJobRunState::Running,
            exit_code: 0,
        }];

        handle_sync(&registry, &scheduler, &peer_table, local, peer, &remote, 1000)
            .await
            .unwrap();

        assert!(registry.contains(job_id).await);
    }
}
