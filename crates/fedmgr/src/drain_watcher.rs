//! The Drain Watcher: periodically checks whether the local
//! cluster is marked `DRAIN` or `REMOVE` in the federation record and, once
//! every locally-originated job has drained off peers, completes the
//! transition — dropping out of the federation entirely for `REMOVE`.

use crate::job_registry::JobRegistry;
use fedmgr_core::{ClusterId, ClusterState, Federation};
use fedmgr_transport::{ClusterModification, ConfigStoreEffects};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct DrainWatcher<C> {
    pub registry: Arc<JobRegistry>,
    pub config_store: Arc<C>,
    pub federation: Arc<RwLock<Federation>>,
    pub local: ClusterId,
    pub interval: Duration,
}

impl<C: ConfigStoreEffects> DrainWatcher<C> {
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(err) = self.tick().await {
                tracing::warn!(error = %err, "drain watcher tick failed");
            }
        }
    }

    /// One evaluation of the local cluster's drain/remove state, exposed
    /// directly for tests.
    pub async fn tick(&self) -> Result<(), fedmgr_transport::ConfigStoreError> {
        let (state, federation_name) = {
            let fed = self.federation.read().await;
            let Some(record) = fed.by_id(self.local) else {
                return Ok(());
            };
            (record.state, fed.name.clone())
        };

        if !state.is_drained() {
            return Ok(());
        }

        if self.has_locally_originated_active_jobs().await {
            return Ok(());
        }

        if state.contains(ClusterState::REMOVE) {
            self.config_store
                .remove_self_from_federation(&federation_name, self.local)
                .await?;
            self.federation.write().await.clusters.retain(|c| c.id != self.local);
            tracing::warn!(cluster = %self.local, "removed self from federation after drain completed");
        } else {
            // Plain DRAIN (no REMOVE): flip to INACTIVE|DRAIN rather than
            // leaving the federation.
            let new_state = ClusterState::INACTIVE | ClusterState::DRAIN;
            self.config_store
                .modify_clusters(ClusterModification {
                    cluster: self.local,
                    new_state: Some(new_state),
                    new_features: None,
                })
                .await?;
            self.federation
                .write()
                .await
                .by_id_mut(self.local)
                .map(|c| c.state = new_state);
            tracing::info!(cluster = %self.local, "drain completed, cluster now inactive");
        }

        Ok(())
    }

    /// True while any locally-originated job still has an active copy at
    /// the local cluster — either running here directly, or kept as a
    /// not-yet-revoked tracker copy after another peer won the lock. Once
    /// the tracker is revoked (`handle_start`) or the job completes (which
    /// destroys the `FedJobInfo` entirely), it stops counting.
    async fn has_locally_originated_active_jobs(&self) -> bool {
        for id in self.registry.all_ids().await {
            if !id.origin().map(|o| o == self.local).unwrap_or(false) {
                continue;
            }
            if let Some(job) = self.registry.get(id).await {
                if job.siblings_active.contains(self.local) {
                    return true;
                }
            }
        }
        false
    }
}
