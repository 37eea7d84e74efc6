//! The Agent Loop: drains each peer's pending-RPC queue into
//! one batched `REQUEST_CTLD_MULT_MSG`, parses the positional reply, retires
//! successes, and exponentially backs off the rest.

use crate::peer_table::{PeerRecord, PeerTable};
use fedmgr_messages::{MultiMsgRequest, MultiMsgResponse, SlurmRc, SLURM_SUCCESS};
use fedmgr_transport::TransportEffects;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// `0 → 2 → 4 → … → 128`, then keeps doubling past 128 rather than capping
/// outright — 128 seconds is only a warn-once marker, not a hard retry
/// ceiling.
fn next_backoff(current: u64) -> u64 {
    if current == 0 {
        2
    } else {
        current.saturating_mul(2)
    }
}

pub struct AgentLoop<T> {
    pub peer_table: std::sync::Arc<PeerTable>,
    pub transport: std::sync::Arc<T>,
    pub tick: Duration,
    pub rpc_timeout: Duration,
    pub comm_fail_log_window_secs: i64,
    pub backoff_warn_at_secs: u64,
}

impl<T: TransportEffects> AgentLoop<T> {
    /// Runs until `cancel` fires, waking on either the fixed tick or
    /// `peer_table.agent_notify`.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.log_abandoned().await;
                    return;
                }
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.peer_table.agent_notify.notified() => {}
            }
            self.drain_all(now_secs()).await;
        }
    }

    /// One sweep over every peer, used directly by tests and by `run`'s loop
    /// body.
    pub async fn drain_all(&self, now: i64) {
        for peer in self.peer_table.peer_ids().await {
            if let Some(record) = self.peer_table.get(peer).await {
                self.drain_peer(peer, &record, now).await;
            }
        }
    }

    async fn drain_peer(&self, peer: fedmgr_core::ClusterId, record: &std::sync::Arc<Mutex<PeerRecord>>, now: i64) {
        let (request, due_count) = {
            let guard = record.lock().await;
            let due: Vec<_> = guard.pending.iter().filter(|rpc| rpc.is_due(now)).cloned().collect();
            let msgs = due
                .iter()
                .filter_map(|rpc| fedmgr_messages::SibMsg::from_bytes(&rpc.buffer).ok())
                .collect::<Vec<_>>();
            (MultiMsgRequest::new(msgs), due.len())
        };
        if request.is_empty() {
            return;
        }

        let Ok(bytes) = request.to_bytes() else {
            return;
        };

        match self.transport.send_recv(peer, bytes, self.rpc_timeout).await {
            Ok(reply_bytes) => match MultiMsgResponse::from_bytes(&reply_bytes) {
                Ok(response) => self.apply_response(peer, record, &request, &response, now).await,
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "malformed batched response");
                    self.back_off_due(record, due_count, now).await;
                }
            },
            Err(err) => {
                let should_log = record.lock().await.should_log_comm_fail(now, self.comm_fail_log_window_secs);
                if should_log {
                    tracing::warn!(peer = %peer, error = %err, "peer unreachable");
                }
                self.back_off_due(record, due_count, now).await;
            }
        }
    }

    async fn apply_response(
        &self,
        peer: fedmgr_core::ClusterId,
        record: &std::sync::Arc<Mutex<PeerRecord>>,
        request: &MultiMsgRequest,
        response: &MultiMsgResponse,
        now: i64,
    ) {
        let Ok(pairs) = response.zip_with_request(request) else {
            tracing::warn!(peer = %peer, "batch response length mismatch, leaving queue untouched for retry");
            self.back_off_due(record, request.len(), now).await;
            return;
        };
        let failed_job_ids: std::collections::HashSet<_> = pairs
            .filter(|(_, rc)| *rc != SLURM_SUCCESS)
            .map(|(msg, _)| msg.job_id)
            .collect();

        let mut guard = record.lock().await;
        let mut retained = std::collections::VecDeque::with_capacity(guard.pending.len());
        while let Some(mut rpc) = guard.pending.pop_front() {
            if !rpc.is_due(now) {
                retained.push_back(rpc);
                continue;
            }
            if failed_job_ids.contains(&rpc.job_id) {
                rpc.last_try = now;
                rpc.defer_seconds = next_backoff(rpc.defer_seconds);
                if rpc.defer_seconds >= self.backoff_warn_at_secs && !rpc.warned_at_cap {
                    rpc.warned_at_cap = true;
                    tracing::warn!(
                        peer = %peer,
                        job = %rpc.job_id,
                        defer_seconds = rpc.defer_seconds,
                        "rpc retry backoff reached warn threshold, continuing to retry"
                    );
                }
                retained.push_back(rpc);
            }
            // else: succeeded, drop it.
        }
        guard.pending = retained;
    }

    async fn back_off_due(&self, record: &std::sync::Arc<Mutex<PeerRecord>>, _due_count: usize, now: i64) {
        let mut guard = record.lock().await;
        for rpc in guard.pending.iter_mut().filter(|r| r.is_due(now)) {
            rpc.last_try = now;
            rpc.defer_seconds = next_backoff(rpc.defer_seconds);
            if rpc.defer_seconds >= self.backoff_warn_at_secs && !rpc.warned_at_cap {
                rpc.warned_at_cap = true;
            }
        }
    }

    async fn log_abandoned(&self) {
        for peer in self.peer_table.peer_ids().await {
            if let Some(record) = self.peer_table.get(peer).await {
                let guard = record.lock().await;
                for rpc in guard.pending.iter() {
                    tracing::warn!(peer = %peer, job = %rpc.job_id, msg_type = ?rpc.msg_type, "abandoning pending rpc on shutdown");
                }
            }
        }
    }
}

fn now_secs() -> i64 {
    crate::job_update_loop::now_secs()
}
