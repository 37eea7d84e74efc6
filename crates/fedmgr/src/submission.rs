//! The Submission Orchestrator: turns one local submission
//! request into a local allocation plus a fan-out of `SUBMIT` envelopes to
//! every feature-viable sibling.

use crate::error::FedMgrError;
use crate::job_registry::JobRegistry;
use crate::peer_table::{PeerTable, PendingRpc};
use crate::revocation;
use fedmgr_core::{ClusterId, Federation, FedJobId, FedJobInfo, SiblingMask};
use fedmgr_messages::{SibMsg, SibMsgType};
use fedmgr_transport::{AllocateOutcome, SchedulerEffects};
use std::collections::BTreeSet;

/// A caller's submission request, already parsed out of the scheduler's
/// native submit descriptor. `requested_clusters`, when non-empty, restricts
/// fan-out to those names;
/// `required_features` restricts it by feature (`ClusterFeatures=`).
pub struct SubmitRequest {
    pub descriptor: Vec<u8>,
    pub submitter_uid: u32,
    pub requested_clusters: Vec<String>,
    pub required_features: BTreeSet<String>,
}

pub struct SubmissionOrchestrator<'a, S> {
    pub registry: &'a JobRegistry,
    pub peer_table: &'a PeerTable,
    pub scheduler: &'a S,
    pub local: ClusterId,
}

impl<'a, S: SchedulerEffects> SubmissionOrchestrator<'a, S> {
    /// `Submit(jobDesc, submitterUid)`.
    ///
    /// Rejects a caller-preselected `JobId` upstream of this call — the
    /// orchestrator always mints its own id via `next_local_id`; a preset
    /// `JobId=` is a policy violation the scheduler-facing layer must catch
    /// before reaching here.
    pub async fn submit(&self, federation: &Federation, request: SubmitRequest) -> Result<FedJobId, FedMgrError> {
        self.check_requested_features(federation, &request)?;
        let viable = self.compute_viable_siblings(federation, &request);
        let local_id = self.scheduler.next_local_id().await?;
        let job_id = FedJobId::new(self.local, local_id)?;

        let outcome = self
            .scheduler
            .allocate(job_id, &request.descriptor, request.submitter_uid)
            .await?;

        match outcome {
            AllocateOutcome::Failed => {
                return Err(FedMgrError::policy(format!("local allocation failed for {job_id}")));
            }
            AllocateOutcome::AllocatedHeld => {
                // Submitted held: record it, but defer fan-out until the
                // hold clears.
                let mut job = FedJobInfo::new(job_id);
                job.siblings_active = SiblingMask::single(self.local);
                job.siblings_viable = viable;
                self.registry.insert(job).await;
                return Ok(job_id);
            }
            AllocateOutcome::Allocated => {}
        }

        let mut job = FedJobInfo::new(job_id);
        job.siblings_active = SiblingMask::from_ids([self.local]).union(viable);
        job.siblings_viable = viable;
        self.registry.insert(job).await;

        self.fan_out(job_id, viable, request.submitter_uid, &request.descriptor).await;

        Ok(job_id)
    }

    /// `INVALID_CLUSTER_FEATURE`: every requested feature must be carried by
    /// at least one cluster in the federation (including the local one), or
    /// the submission is rejected outright rather than silently fanning out
    /// to nobody.
    fn check_requested_features(&self, federation: &Federation, request: &SubmitRequest) -> Result<(), FedMgrError> {
        for feature in &request.required_features {
            if !federation.clusters.iter().any(|c| c.features.contains(feature)) {
                return Err(FedMgrError::policy(format!(
                    "INVALID_CLUSTER_FEATURE: no cluster in the federation provides feature {feature:?}"
                )));
            }
        }
        Ok(())
    }

    fn compute_viable_siblings(&self, federation: &Federation, request: &SubmitRequest) -> SiblingMask {
        let mut mask = SiblingMask::EMPTY;
        for cluster in &federation.clusters {
            if cluster.id == self.local {
                continue;
            }
            if cluster.state.is_drained() {
                continue;
            }
            if !request.requested_clusters.is_empty() && !request.requested_clusters.contains(&cluster.name) {
                continue;
            }
            if !request.required_features.is_subset(&cluster.features) {
                continue;
            }
            mask = mask.with(cluster.id);
        }
        mask
    }

    async fn fan_out(&self, job_id: FedJobId, viable: SiblingMask, submitter_uid: u32, descriptor: &[u8]) {
        for peer in viable.iter_ascending() {
            let envelope = SibMsg::submit(true, job_id, submitter_uid, viable, 0, descriptor.to_vec());
            let Ok(bytes) = envelope.to_bytes() else {
                tracing::warn!(job = %job_id, peer = %peer, "failed to encode submit envelope");
                continue;
            };
            let rpc = PendingRpc::new(job_id, SibMsgType::SubmitBatch, bytes);
            self.peer_table.enqueue(peer, rpc).await;
        }
    }

    /// Apply a delta to an already-submitted job's `Clusters=`/
    /// `ClusterFeatures=` constraint: revoke siblings no longer viable,
    /// submit to newly viable ones, and — for the origin itself — clear the
    /// `REVOKED` marker on a non-viable→viable transition or revoke the
    /// origin tracking copy on a viable→non-viable one.
    ///
    /// `origin_viable` is the caller's recomputed viability of the local
    /// (origin) cluster under the new `Clusters=`/`ClusterFeatures=`
    /// constraint — the sibling masks here never include `self.local`, so
    /// that check can't be derived from `new_viable` alone.
    pub async fn apply_viability_delta(
        &self,
        job_id: FedJobId,
        new_viable: SiblingMask,
        origin_viable: bool,
        submitter_uid: u32,
        descriptor: &[u8],
    ) -> Result<(), FedMgrError> {
        let Some(job) = self.registry.get(job_id).await else {
            return Err(FedMgrError::policy(format!("unknown job {job_id}")));
        };
        let previously_viable = job.siblings_viable;
        let removed = previously_viable.difference(new_viable);
        let added = new_viable.difference(previously_viable);

        if !removed.is_empty() {
            revocation::revoke_siblings(self.peer_table, job_id, removed, self.local, None, 0, 0).await;
        }

        if !added.is_empty() {
            self.fan_out(job_id, added, submitter_uid, descriptor).await;
        }

        let origin_was_active = job.siblings_active.contains(self.local);
        if !origin_viable && origin_was_active {
            // Origin moved out of scope: revoke its own tracking copy, same
            // as the lock-protocol Start handler does when another peer
            // wins the lock — without purging, so status stays servable.
            self.scheduler.revoke(job_id, false, 0, 0).await?;
        }

        self.registry
            .with_mut(job_id, |job| {
                job.siblings_viable = new_viable;
                job.siblings_active = job.siblings_active.difference(removed);
                job.siblings_active = if origin_viable {
                    job.siblings_active.with(self.local)
                } else {
                    job.siblings_active.without(self.local)
                };
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_table::PeerRecord;
    use fedmgr_core::ClusterRecord;
    use fedmgr_transport::fakes::FakeScheduler;

    fn cluster(id: u32, name: &str, features: &[&str]) -> ClusterRecord {
        ClusterRecord {
            id: ClusterId::new(id).unwrap(),
            name: name.into(),
            host: "h".into(),
            port: 1,
            features: features.iter().map(|s| s.to_string()).collect(),
            state: Default::default(),
        }
    }

    #[tokio::test]
    async fn submit_fans_out_to_all_viable_siblings() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let mut fed = Federation::new("fed1");
        fed.clusters.push(cluster(1, "local", &[]));
        fed.clusters.push(cluster(2, "b", &[]));

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        let job_id = orchestrator
            .submit(
                &fed,
                SubmitRequest {
                    descriptor: vec![9],
                    submitter_uid: 0,
                    requested_clusters: vec![],
                    required_features: Default::default(),
                },
            )
            .await
            .unwrap();

        assert!(registry.contains(job_id).await);
        let record = peer_table.get(peer).await.unwrap();
        assert_eq!(record.lock().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn submit_respects_required_features() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let gpu_peer = ClusterId::new(2).unwrap();
        let cpu_peer = ClusterId::new(3).unwrap();
        peer_table.insert(PeerRecord::new(gpu_peer, "gpu", "h", 1)).await;
        peer_table.insert(PeerRecord::new(cpu_peer, "cpu", "h", 1)).await;

        let mut fed = Federation::new("fed1");
        fed.clusters.push(cluster(1, "local", &[]));
        fed.clusters.push(cluster(2, "gpu", &["gpu"]));
        fed.clusters.push(cluster(3, "cpu", &[]));

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        let mut required = BTreeSet::new();
        required.insert("gpu".to_string());
        orchestrator
            .submit(
                &fed,
                SubmitRequest {
                    descriptor: vec![],
                    submitter_uid: 0,
                    requested_clusters: vec![],
                    required_features: required,
                },
            )
            .await
            .unwrap();

        let gpu_record = peer_table.get(gpu_peer).await.unwrap();
        assert_eq!(gpu_record.lock().await.pending.len(), 1);
        let cpu_record = peer_table.get(cpu_peer).await.unwrap();
        assert!(cpu_record.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_unmatched_required_feature() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let mut fed = Federation::new("fed1");
        fed.clusters.push(cluster(1, "local", &[]));
        fed.clusters.push(cluster(2, "b", &[]));

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        let mut required = BTreeSet::new();
        required.insert("quantum".to_string());
        let err = orchestrator
            .submit(
                &fed,
                SubmitRequest {
                    descriptor: vec![],
                    submitter_uid: 0,
                    requested_clusters: vec![],
                    required_features: required,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FedMgrError::Policy(msg) if msg.contains("INVALID_CLUSTER_FEATURE")));
        assert!(!registry.contains(FedJobId::new(local, 0).unwrap()).await);
    }

    #[tokio::test]
    async fn viability_delta_revokes_removed_and_submits_added() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let old_peer = ClusterId::new(2).unwrap();
        let new_peer = ClusterId::new(3).unwrap();
        peer_table.insert(PeerRecord::new(old_peer, "old", "h", 1)).await;
        peer_table.insert(PeerRecord::new(new_peer, "new", "h", 1)).await;

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(old_peer);
        job.siblings_active = SiblingMask::from_ids([local, old_peer]);
        registry.insert(job).await;

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        orchestrator
            .apply_viability_delta(job_id, SiblingMask::single(new_peer), true, 0, &[])
            .await
            .unwrap();

        let old_record = peer_table.get(old_peer).await.unwrap();
        assert_eq!(old_record.lock().await.pending.len(), 1);
        let new_record = peer_table.get(new_peer).await.unwrap();
        assert_eq!(new_record.lock().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn viability_delta_revokes_origin_tracking_copy_when_origin_leaves_scope() {
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

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        orchestrator
            .apply_viability_delta(job_id, SiblingMask::single(peer), false, 0, &[])
            .await
            .unwrap();

        assert!(scheduler.calls.lock().unwrap().iter().any(|c| c.starts_with("revoke")));
        let after = registry.get(job_id).await.unwrap();
        assert!(!after.siblings_active.contains(local));
    }

    #[tokio::test]
    async fn viability_delta_clears_revoked_marker_when_origin_returns_to_scope() {
        let registry = JobRegistry::new();
        let peer_table = PeerTable::new();
        let scheduler = FakeScheduler::new();
        let local = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        peer_table.insert(PeerRecord::new(peer, "b", "h", 1)).await;

        let job_id = FedJobId::new(local, 1).unwrap();
        let mut job = FedJobInfo::new(job_id);
        job.siblings_viable = SiblingMask::single(peer);
        job.siblings_active = SiblingMask::single(peer);
        registry.insert(job).await;

        let orchestrator = SubmissionOrchestrator {
            registry: &registry,
            peer_table: &peer_table,
            scheduler: &scheduler,
            local,
        };

        orchestrator
            .apply_viability_delta(job_id, SiblingMask::single(peer), true, 0, &[])
            .await
            .unwrap();

        assert!(!scheduler.calls.lock().unwrap().iter().any(|c| c.starts_with("revoke")));
        let after = registry.get(job_id).await.unwrap();
        assert!(after.siblings_active.contains(local));
    }
}
