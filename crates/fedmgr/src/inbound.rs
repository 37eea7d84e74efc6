//! Inbound dispatch: the transport's recv side enqueues inbound work onto
//! the Job-Update Loop. Batched `REQUEST_CTLD_MULT_MSG` envelopes are decoded
//! one message at a time and handed to the Job-Update Loop's queue; the
//! synchronous `REQUEST_SIB_JOB_LOCK`/`UNLOCK` envelopes bypass that queue
//! entirely and are answered directly from this loop.

use crate::job_registry::JobRegistry;
use crate::job_update_loop::{now_secs, JobUpdate};
use crate::lock;
use fedmgr_core::{ClusterId, FedJobId};
use fedmgr_messages::{MultiMsgRequest, MultiMsgResponse, SibMsg, SibMsgType, SLURM_SUCCESS};
use fedmgr_transport::{InboundMessage, JobRunState, SchedulerEffects, TransportEffects};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct InboundLoop<S> {
    pub registry: Arc<JobRegistry>,
    pub local: ClusterId,
    pub job_update_tx: mpsc::UnboundedSender<JobUpdate>,
    pub lock_stale_secs: i64,
    pub scheduler: Arc<S>,
}

impl<S: SchedulerEffects> InboundLoop<S> {
    /// Drain both the inbound-message channel and the new-connection channel
    /// until `cancel` fires or the transport drops them.
    pub async fn run<T: TransportEffects>(&self, transport: &T, cancel: CancellationToken) {
        let mut inbound = transport.subscribe_inbound();
        let mut new_conns = transport.subscribe_new_connections();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => self.handle_inbound(msg).await,
                        None => return,
                    }
                }
                peer = new_conns.recv() => {
                    match peer {
                        Some(peer) => self.on_new_connection(peer).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn on_new_connection(&self, peer: ClusterId) {
        let _ = self.job_update_tx.send(JobUpdate::SendJobSync { peer });
    }

    async fn handle_inbound(&self, msg: InboundMessage) {
        let InboundMessage { peer, bytes, reply } = msg;

        if let Ok(request) = MultiMsgRequest::from_bytes(&bytes) {
            let mut return_codes = Vec::with_capacity(request.len());
            for envelope in &request.msgs {
                return_codes.push(self.dispatch_queued(peer, envelope).await);
            }
            if let Some(reply) = reply {
                if let Ok(resp) = MultiMsgResponse::new(return_codes).to_bytes() {
                    let _ = reply.send(resp);
                }
            }
            return;
        }

        if let Ok(envelope) = SibMsg::from_bytes(&bytes) {
            let rc = match envelope.sib_msg_type {
                SibMsgType::LockRequest => {
                    let requester = envelope.cluster_id.unwrap_or(peer);
                    match lock::acquire(&self.registry, envelope.job_id, requester, now_secs(), self.lock_stale_secs).await {
                        Ok(()) => SLURM_SUCCESS,
                        Err(_) => 1,
                    }
                }
                SibMsgType::UnlockRequest => {
                    let requester = envelope.cluster_id.unwrap_or(peer);
                    match lock::release(&self.registry, envelope.job_id, requester).await {
                        Ok(()) => SLURM_SUCCESS,
                        Err(_) => 1,
                    }
                }
                _ => self.dispatch_queued(peer, &envelope).await,
            };
            if let Some(reply) = reply {
                let _ = reply.send(rc.to_le_bytes().to_vec());
            }
            return;
        }

        tracing::warn!(peer = %peer, "dropping unparseable inbound envelope");
        if let Some(reply) = reply {
            let _ = reply.send(Vec::new());
        }
    }

    /// Translate one `SibMsg` into a `JobUpdate` and enqueue it; returns the
    /// return code to report back to the sender immediately (the actual
    /// state mutation happens asynchronously on the Job-Update Loop, so this
    /// is always `SLURM_SUCCESS` unless the queue itself is gone).
    async fn dispatch_queued(&self, peer: ClusterId, envelope: &SibMsg) -> i32 {
        let update = match envelope.sib_msg_type {
            SibMsgType::SubmitBatch | SibMsgType::SubmitInt => Some(JobUpdate::Submit {
                from: peer,
                job_id: envelope.job_id,
                descriptor: envelope.inner_buffer.clone(),
                submitter_uid: envelope.req_uid.unwrap_or(0),
                fed_siblings: envelope.fed_siblings.unwrap_or(fedmgr_core::SiblingMask::EMPTY),
            }),
            SibMsgType::SubmitResp => Some(JobUpdate::SubmitResp {
                job_id: envelope.job_id,
                from: envelope.cluster_id.unwrap_or(peer),
                rc: envelope.return_code.unwrap_or(0),
            }),
            SibMsgType::Start => Some(JobUpdate::Start {
                job_id: envelope.job_id,
                start_time: envelope.start_time.unwrap_or(0),
                lock_holder: envelope.cluster_id.unwrap_or(peer),
            }),
            SibMsgType::Complete | SibMsgType::Revoke => {
                // §4.6: both "already completed" and the requeue hold-code
                // are properties of the local copy of the job, consulted
                // from the scheduler before the Job-Update Loop applies the
                // revoke/requeue-finalization transition.
                let already_completed = matches!(
                    self.scheduler.job_run_state(envelope.job_id).await,
                    Ok(Some((JobRunState::Completed, _)))
                );
                let requeue_hold = self
                    .scheduler
                    .requeue_hold(envelope.job_id)
                    .await
                    .unwrap_or(fedmgr_core::RequeueHold::Other);
                Some(JobUpdate::Complete {
                    job_id: envelope.job_id,
                    rc: envelope.return_code.unwrap_or(0),
                    start_time: envelope.start_time.unwrap_or(0),
                    already_completed,
                    requeue_hold,
                })
            }
            SibMsgType::Cancel => Some(JobUpdate::Cancel {
                job_id: envelope.job_id,
                uid: envelope.req_uid.unwrap_or(0),
            }),
            SibMsgType::Requeue => Some(JobUpdate::Requeue {
                job_id: envelope.job_id,
                state: envelope.inner_type as u32,
                uid: envelope.req_uid.unwrap_or(0),
            }),
            SibMsgType::Update => Some(JobUpdate::Update {
                job_id: envelope.job_id,
                from: Some(peer),
                descriptor: envelope.inner_buffer.clone(),
                submitter_uid: envelope.req_uid.unwrap_or(0),
                requester_uid: envelope.req_uid.unwrap_or(0),
            }),
            SibMsgType::UpdateResponse => Some(JobUpdate::UpdateResponse {
                job_id: envelope.job_id,
                from: envelope.cluster_id.unwrap_or(peer),
                rc: envelope.return_code.unwrap_or(0),
            }),
            SibMsgType::RemoveActiveSibBit => Some(JobUpdate::RemoveActiveSibBit {
                job_id: envelope.job_id,
                peer: envelope.cluster_id.unwrap_or(peer),
            }),
            SibMsgType::Sync => match envelope.sync_job_records() {
                Ok(remote_jobs) => Some(JobUpdate::Sync {
                    from: envelope.cluster_id.unwrap_or(peer),
                    remote_jobs,
                    sync_time: envelope.start_time.unwrap_or(0),
                }),
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "malformed SYNC payload");
                    None
                }
            },
            SibMsgType::SendJobSync => Some(JobUpdate::SendJobSync {
                peer: envelope.cluster_id.unwrap_or(peer),
            }),
            SibMsgType::LockRequest | SibMsgType::UnlockRequest => None,
        };

        match update {
            Some(update) => match self.job_update_tx.send(update) {
                Ok(()) => SLURM_SUCCESS,
                Err(_) => 1,
            },
            None => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedmgr_core::FedJobInfo;
    use fedmgr_transport::fakes::FakeScheduler;
    use tokio::sync::{mpsc as tmpsc, oneshot};

    fn make_loop() -> (InboundLoop<FakeScheduler>, tmpsc::UnboundedReceiver<JobUpdate>) {
        let (tx, rx) = tmpsc::unbounded_channel();
        let loop_ = InboundLoop {
            registry: Arc::new(JobRegistry::new()),
            local: ClusterId::new(1).unwrap(),
            job_update_tx: tx,
            lock_stale_secs: 60,
            scheduler: Arc::new(FakeScheduler::new()),
        };
        (loop_, rx)
    }

    #[tokio::test]
    async fn batched_submit_is_queued_and_acked_success() {
        let (loop_, mut rx) = make_loop();
        let origin = ClusterId::new(2).unwrap();
        let job_id = FedJobId::new(origin, 1).unwrap();
        let envelope = SibMsg::submit(true, job_id, 0, fedmgr_core::SiblingMask::EMPTY, 0, vec![]);
        let request = MultiMsgRequest::new(vec![envelope]);
        let (reply_tx, reply_rx) = oneshot::channel();
        loop_
            .handle_inbound(InboundMessage {
                peer: origin,
                bytes: request.to_bytes().unwrap(),
                reply: Some(reply_tx),
            })
            .await;

        let update = rx.recv().await.unwrap();
        assert!(matches!(update, JobUpdate::Submit { .. }));
        let resp = MultiMsgResponse::from_bytes(&reply_rx.await.unwrap()).unwrap();
        assert_eq!(resp.return_codes, vec![SLURM_SUCCESS]);
    }

    #[tokio::test]
    async fn lock_request_bypasses_queue_and_replies_directly() {
        let (loop_, mut rx) = make_loop();
        let origin = ClusterId::new(1).unwrap();
        let requester = ClusterId::new(2).unwrap();
        let job_id = FedJobId::new(origin, 1).unwrap();
        loop_.registry.insert(FedJobInfo::new(job_id)).await;

        let envelope = SibMsg::lock_request(job_id, requester);
        let (reply_tx, reply_rx) = oneshot::channel();
        loop_
            .handle_inbound(InboundMessage {
                peer: requester,
                bytes: envelope.to_bytes().unwrap(),
                reply: Some(reply_tx),
            })
            .await;

        let rc_bytes = reply_rx.await.unwrap();
        let rc = i32::from_le_bytes(rc_bytes.try_into().unwrap());
        assert_eq!(rc, SLURM_SUCCESS);
        assert_eq!(loop_.registry.get(job_id).await.unwrap().cluster_lock, Some(requester));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_connection_triggers_send_job_sync() {
        let (loop_, mut rx) = make_loop();
        let peer = ClusterId::new(2).unwrap();
        loop_.on_new_connection(peer).await;
        let update = rx.recv().await.unwrap();
        assert!(matches!(update, JobUpdate::SendJobSync { peer: p } if p == peer));
    }

    #[tokio::test]
    async fn inbound_complete_derives_already_completed_from_scheduler_state() {
        let (loop_, mut rx) = make_loop();
        let origin = ClusterId::new(2).unwrap();
        let job_id = FedJobId::new(origin, 1).unwrap();
        loop_
            .scheduler
            .set_run_state(job_id, fedmgr_transport::JobRunState::Completed, 0);

        let envelope = SibMsg::complete(job_id, 0, 0);
        loop_.dispatch_queued(origin, &envelope).await;

        let update = rx.recv().await.unwrap();
        match update {
            JobUpdate::Complete { already_completed, .. } => assert!(already_completed),
            other => panic!("expected JobUpdate::Complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_revoke_derives_requeue_hold_from_scheduler_state() {
        let (loop_, mut rx) = make_loop();
        let origin = ClusterId::new(2).unwrap();
        let job_id = FedJobId::new(origin, 1).unwrap();
        loop_
            .scheduler
            .set_requeue_hold(job_id, fedmgr_core::RequeueHold::RequeueFed);

        let envelope = SibMsg::revoke(job_id, 0, 0);
        loop_.dispatch_queued(origin, &envelope).await;

        let update = rx.recv().await.unwrap();
        match update {
            JobUpdate::Complete {
                already_completed,
                requeue_hold,
                ..
            } => {
                assert!(!already_completed);
                assert_eq!(requeue_hold, fedmgr_core::RequeueHold::RequeueFed);
            }
            other => panic!("expected JobUpdate::Complete, got {other:?}"),
        }
    }
}
