//! The Membership Controller: applies `Join`/`Leave`/`Update`
//! transitions driven by config-store change notifications, serialized
//! behind one mutex so overlapping transitions never interleave.

use crate::peer_table::{PeerRecord, PeerTable};
use fedmgr_core::{ClusterId, Federation};
use fedmgr_transport::{ConfigStoreEffects, ConfigUpdate, TransportEffects};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct MembershipController<C, T> {
    pub peer_table: Arc<PeerTable>,
    pub federation: Arc<RwLock<Federation>>,
    pub local: ClusterId,
    pub config_store: Arc<C>,
    pub transport: Arc<T>,
    /// Serializes transitions.
    update_mutex: Mutex<()>,
}

impl<C: ConfigStoreEffects, T: TransportEffects> MembershipController<C, T> {
    pub fn new(
        peer_table: Arc<PeerTable>,
        federation: Arc<RwLock<Federation>>,
        local: ClusterId,
        config_store: Arc<C>,
        transport: Arc<T>,
    ) -> Self {
        Self {
            peer_table,
            federation,
            local,
            config_store,
            transport,
            update_mutex: Mutex::new(()),
        }
    }

    /// Drain the config-store's update channel until it closes (manager
    /// shutdown), applying each transition as it arrives.
    pub async fn run(&self, mut updates: tokio::sync::mpsc::Receiver<ConfigUpdate>) {
        while let Some(update) = updates.recv().await {
            if let Err(err) = self.apply(update).await {
                tracing::warn!(error = %err, "membership update failed");
            }
        }
    }

    pub async fn apply(&self, update: ConfigUpdate) -> Result<(), fedmgr_transport::TransportError> {
        let _guard = self.update_mutex.lock().await;
        match update {
            ConfigUpdate::FederationChanged(new_federation) => self.reconcile_membership(new_federation).await,
            ConfigUpdate::ClusterStateChanged { cluster, state } => {
                self.federation
                    .write()
                    .await
                    .by_id_mut(cluster)
                    .map(|c| c.state = state);
                Ok(())
            }
        }
    }

    /// Full `Join`/`Leave` reconciliation against a freshly fetched
    /// federation record: peers present in the new record but
    /// missing from the table are joined and opened; peers present in the
    /// table but gone from the new record are torn down; peers that persist
    /// across a membership reload keep their existing connection state.
    async fn reconcile_membership(&self, new_federation: Federation) -> Result<(), fedmgr_transport::TransportError> {
        let existing_ids = self.peer_table.peer_ids().await;
        let new_ids: Vec<ClusterId> = new_federation
            .clusters
            .iter()
            .map(|c| c.id)
            .filter(|id| *id != self.local)
            .collect();

        for id in &existing_ids {
            if !new_ids.contains(id) {
                self.peer_table.close_send(*id, self.transport.as_ref()).await?;
                self.peer_table.remove(*id).await;
            }
        }

        for cluster in new_federation.clusters.iter().filter(|c| c.id != self.local) {
            if existing_ids.contains(&cluster.id) {
                // Already present: carry over the live connection/queue
                // state untouched rather than replacing the record.
                if let Some(record) = self.peer_table.get(cluster.id).await {
                    let mut guard = record.lock().await;
                    guard.name = cluster.name.clone();
                    guard.host = cluster.host.clone();
                    guard.port = cluster.port;
                    guard.state = cluster.state;
                }
                continue;
            }
            let record = PeerRecord::new(cluster.id, cluster.name.clone(), cluster.host.clone(), cluster.port);
            self.peer_table.insert(record).await;
            self.peer_table.open(cluster.id, self.transport.as_ref()).await?;
        }

        *self.federation.write().await = new_federation;
        Ok(())
    }
}
