//! The Job-Update Loop: a single ordered FIFO consumer that
//! is the only writer of `FedJobInfo` state, making the cluster-lock
//! protocol safe — two origin-side lock attempts can never interleave
//! because they're always handled by this one task.

use crate::error::FedMgrError;
use crate::job_registry::JobRegistry;
use crate::lock;
use crate::peer_table::{PeerTable, PendingRpc};
use crate::revocation;
use fedmgr_core::{ClusterId, FedJobId, FedJobInfo, RequeueHold, SiblingMask};
use fedmgr_messages::{SibMsg, SibMsgType, SlurmRc};
use fedmgr_transport::SchedulerEffects;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One entry on the ordered `JobUpdates` queue.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// `SUBMIT_BATCH` / `SUBMIT_INT` — combined, since both purge any stale
    /// local record then delegate to `Allocate` identically.
    Submit {
        from: ClusterId,
        job_id: FedJobId,
        descriptor: Vec<u8>,
        submitter_uid: u32,
        fed_siblings: SiblingMask,
    },
    SubmitResp { job_id: FedJobId, from: ClusterId, rc: SlurmRc },
    Start { job_id: FedJobId, start_time: i64, lock_holder: ClusterId },
    Complete {
        job_id: FedJobId,
        rc: SlurmRc,
        start_time: i64,
        already_completed: bool,
        requeue_hold: RequeueHold,
    },
    Cancel { job_id: FedJobId, uid: u32 },
    Requeue { job_id: FedJobId, state: u32, uid: u32 },
    Update {
        job_id: FedJobId,
        from: Option<ClusterId>,
        descriptor: Vec<u8>,
        submitter_uid: u32,
        requester_uid: u32,
    },
    UpdateResponse { job_id: FedJobId, from: ClusterId, rc: SlurmRc },
    RemoveActiveSibBit { job_id: FedJobId, peer: ClusterId },
    Sync {
        from: ClusterId,
        remote_jobs: Vec<fedmgr_messages::SyncJobRecord>,
        sync_time: i64,
    },
    SendJobSync { peer: ClusterId },
}

pub struct JobUpdateLoop<S> {
    pub registry: Arc<JobRegistry>,
    pub peer_table: Arc<PeerTable>,
    pub local: ClusterId,
    pub scheduler: S,
    pub update_retry_max: u32,
    pub update_retry_delay_ms: u64,
    pub update_stale_secs: i64,
}

impl<S: SchedulerEffects> JobUpdateLoop<S> {
    /// Drain `rx` until the channel closes (manager shutdown). Each update is
    /// applied fully before the next is dequeued — the single-writer FIFO
    /// discipline that keeps the cluster-lock protocol race-free.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<JobUpdate>) {
        while let Some(update) = rx.recv().await {
            if let Err(err) = self.apply(update).await {
                tracing::warn!(error = %err, "job update handler failed");
            }
        }
    }

    pub async fn apply(&self, update: JobUpdate) -> Result<(), FedMgrError> {
        match update {
            JobUpdate::Submit {
                from,
                job_id,
                descriptor,
                submitter_uid,
                fed_siblings,
            } => self.handle_submit(from, job_id, &descriptor, submitter_uid, fed_siblings).await,
            JobUpdate::SubmitResp { job_id, from, rc } => self.handle_submit_resp(job_id, from, rc).await,
            JobUpdate::Start { job_id, start_time, lock_holder } => {
                self.handle_start(job_id, lock_holder, start_time).await
            }
            JobUpdate::Complete { job_id, rc, start_time, already_completed, requeue_hold } => {
                self.handle_complete(job_id, rc, start_time, already_completed, requeue_hold).await
            }
            JobUpdate::Cancel { job_id, uid } => self.scheduler.kill_step(job_id, uid).await.map_err(Into::into),
            JobUpdate::Requeue { job_id, state, uid } => {
                self.scheduler.requeue(job_id, state, uid).await.map_err(Into::into)
            }
            JobUpdate::Update { job_id, from, descriptor, submitter_uid, requester_uid } => {
                self.handle_update(job_id, from, &descriptor, submitter_uid, requester_uid).await
            }
            JobUpdate::UpdateResponse { job_id, from, .. } => {
                self.registry.with_mut(job_id, |job| job.ack_update(from)).await;
                Ok(())
            }
            JobUpdate::RemoveActiveSibBit { job_id, peer } => {
                self.registry
                    .with_mut(job_id, |job| job.siblings_active = job.siblings_active.without(peer))
                    .await;
                Ok(())
            }
            JobUpdate::Sync { from, remote_jobs, sync_time } => {
                crate::reconcile::handle_sync(&self.registry, &self.scheduler, &self.peer_table, self.local, from, &remote_jobs, sync_time)
                    .await
            }
            JobUpdate::SendJobSync { peer } => {
                crate::reconcile::send_job_sync(&self.registry, &self.scheduler, &self.peer_table, self.local, peer, now_secs()).await
            }
        }
    }

    async fn handle_submit(
        &self,
        from: ClusterId,
        job_id: FedJobId,
        descriptor: &[u8],
        submitter_uid: u32,
        fed_siblings: SiblingMask,
    ) -> Result<(), FedMgrError> {
        // Purge any stale local record for the same id: purge-then-reallocate
        // is preserved even though re-submission semantics under a different
        // user are ambiguous.
        self.registry.remove(job_id).await;

        let outcome = self.scheduler.allocate(job_id, descriptor, submitter_uid).await;
        let rc: SlurmRc = match &outcome {
            Ok(_) => fedmgr_messages::SLURM_SUCCESS,
            Err(_) => 1,
        };

        if outcome.is_ok() {
            let mut job = FedJobInfo::new(job_id);
            job.siblings_active = job.siblings_active.with(self.local);
            job.siblings_viable = fed_siblings;
            self.registry.insert(job).await;
        }

        let envelope = SibMsg::submit_resp(job_id, self.local, rc);
        self.send(from, SibMsgType::SubmitResp, envelope).await;
        outcome.map(|_| ()).map_err(Into::into)
    }

    async fn handle_submit_resp(&self, job_id: FedJobId, from: ClusterId, rc: SlurmRc) -> Result<(), FedMgrError> {
        if rc != fedmgr_messages::SLURM_SUCCESS {
            self.registry
                .with_mut(job_id, |job| job.siblings_active = job.siblings_active.without(from))
                .await;
        }
        Ok(())
    }

    async fn handle_start(&self, job_id: FedJobId, lock_holder: ClusterId, start_time: i64) -> Result<(), FedMgrError> {
        let current_lock = self.registry.get(job_id).await.and_then(|j| j.cluster_lock);
        lock::validate_start(current_lock, lock_holder)?;

        let origin = job_id.origin().ok();
        let previously_active = self
            .registry
            .with_mut(job_id, |job| {
                let prior = job.siblings_active;
                job.siblings_active = SiblingMask::single(lock_holder);
                prior
            })
            .await
            .unwrap_or(SiblingMask::EMPTY);

        revocation::revoke_siblings(
            &self.peer_table,
            job_id,
            previously_active,
            self.local,
            Some(lock_holder),
            0,
            start_time,
        )
        .await;

        if origin != Some(lock_holder) && origin == Some(self.local) {
            // We are the origin and some other peer won the lock: revoke our
            // own tracking copy locally (not a peer RPC — `revoke_siblings`
            // never targets `local`). The `FedJobInfo` itself is left in
            // place, unpurged, so status keeps being servable from here.
            self.scheduler.revoke(job_id, false, 0, start_time).await?;
        }

        Ok(())
    }

    async fn handle_complete(
        &self,
        job_id: FedJobId,
        rc: SlurmRc,
        start_time: i64,
        already_completed: bool,
        requeue_hold: RequeueHold,
    ) -> Result<(), FedMgrError> {
        revocation::revoke(
            &self.registry,
            &self.scheduler,
            job_id,
            self.local,
            true,
            rc,
            start_time,
            already_completed,
            requeue_hold,
        )
        .await
    }

    async fn handle_update(
        &self,
        job_id: FedJobId,
        from: Option<ClusterId>,
        descriptor: &[u8],
        submitter_uid: u32,
        requester_uid: u32,
    ) -> Result<(), FedMgrError> {
        let mut attempt = 0u32;
        let rc: SlurmRc = loop {
            match self.scheduler.update(job_id, descriptor, submitter_uid, requester_uid).await {
                Ok(()) => break fedmgr_messages::SLURM_SUCCESS,
                Err(fedmgr_transport::SchedulerError::DatabaseIndexNotAssigned) if attempt < self.update_retry_max => {
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(self.update_retry_delay_ms)).await;
                }
                Err(_) => break 1,
            }
        };

        if let Some(from) = from {
            let envelope = SibMsg::update_response(job_id, self.local, rc);
            self.send(from, SibMsgType::UpdateResponse, envelope).await;
        }
        Ok(())
    }

    async fn send(&self, to: ClusterId, msg_type: SibMsgType, envelope: SibMsg) {
        match envelope.to_bytes() {
            Ok(bytes) => {
                self.peer_table.enqueue(to, PendingRpc::new(envelope.job_id, msg_type, bytes)).await;
            }
            Err(err) => tracing::warn!(peer = %to, error = %err, "failed to encode envelope"),
        }
    }
}
