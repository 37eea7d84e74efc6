//! The live `FedJobInfo` table, guarded by a
//! single lock (`JobListMutex`) so the Job-Update Loop is the
//! only writer and every handler sees a consistent view per invocation.

use fedmgr_core::{FedJobId, FedJobInfo};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<FedJobId, FedJobInfo>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `jobs`, for manager construction
    /// before any task has started.
    pub fn with_jobs(jobs: Vec<FedJobInfo>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.job_id, j)).collect()),
        }
    }

    pub async fn insert(&self, job: FedJobInfo) {
        self.jobs.write().await.insert(job.job_id, job);
    }

    pub async fn remove(&self, job_id: FedJobId) -> Option<FedJobInfo> {
        self.jobs.write().await.remove(&job_id)
    }

    pub async fn get(&self, job_id: FedJobId) -> Option<FedJobInfo> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn contains(&self, job_id: FedJobId) -> bool {
        self.jobs.read().await.contains_key(&job_id)
    }

    /// Mutate a job's record in place under the write lock, the only way
    /// `FedJobInfo` state should ever change.
    pub async fn with_mut<R>(&self, job_id: FedJobId, f: impl FnOnce(&mut FedJobInfo) -> R) -> Option<R> {
        let mut guard = self.jobs.write().await;
        guard.get_mut(&job_id).map(f)
    }

    pub async fn all_ids(&self) -> Vec<FedJobId> {
        self.jobs.read().await.keys().copied().collect()
    }

    pub async fn snapshot_all(&self) -> Vec<FedJobInfo> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Replace the whole table, used when restoring from a snapshot.
    pub async fn restore(&self, jobs: Vec<FedJobInfo>) {
        let mut guard = self.jobs.write().await;
        guard.clear();
        for job in jobs {
            guard.insert(job.job_id, job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedmgr_core::ClusterId;

    #[tokio::test]
    async fn insert_get_remove_roundtrip() {
        let registry = JobRegistry::new();
        let origin = ClusterId::new(1).unwrap();
        let id = FedJobId::new(origin, 1).unwrap();
        registry.insert(FedJobInfo::new(id)).await;
        assert!(registry.contains(id).await);
        assert!(registry.remove(id).await.is_some());
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn with_mut_applies_in_place() {
        let registry = JobRegistry::new();
        let origin = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        let id = FedJobId::new(origin, 1).unwrap();
        registry.insert(FedJobInfo::new(id)).await;
        registry
            .with_mut(id, |job| job.cluster_lock = Some(peer))
            .await;
        assert_eq!(registry.get(id).await.unwrap().cluster_lock, Some(peer));
    }
}
