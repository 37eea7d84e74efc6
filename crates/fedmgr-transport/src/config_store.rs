//! `ConfigStoreEffects`: the federation configuration database contract.
//! Out of scope; only its contract appears here.

use crate::errors::ConfigStoreError;
use async_trait::async_trait;
use fedmgr_core::{ClusterId, ClusterState, Federation};

/// A config-store-driven change the Membership Controller must react to.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    /// The full federation record changed (membership, addresses, features).
    FederationChanged(Federation),
    /// A single peer's state flags changed without a full federation
    /// reload.
    ClusterStateChanged { cluster: ClusterId, state: ClusterState },
}

/// Request to modify one or more clusters' records.
#[derive(Debug, Clone)]
pub struct ClusterModification {
    pub cluster: ClusterId,
    pub new_state: Option<ClusterState>,
    pub new_features: Option<Vec<String>>,
}

/// Request to modify a federation's cluster membership list.
#[derive(Debug, Clone)]
pub struct FederationModification {
    pub federation_name: String,
    pub add_clusters: Vec<ClusterId>,
    pub remove_clusters: Vec<ClusterId>,
}

#[async_trait]
pub trait ConfigStoreEffects: Send + Sync {
    /// Fetch the federation(s) the local cluster currently belongs to.
    /// A controller belongs to at most one at a time.
    async fn get_federations(&self) -> Result<Vec<Federation>, ConfigStoreError>;

    /// Apply a cluster-level modification (state flags, feature list).
    async fn modify_clusters(&self, change: ClusterModification) -> Result<(), ConfigStoreError>;

    /// Apply a federation-level membership modification.
    async fn modify_federations(&self, change: FederationModification) -> Result<(), ConfigStoreError>;

    /// Delete the local cluster's row from the federation's membership list
    /// entirely — distinct from flipping state to `INACTIVE`.
    async fn remove_self_from_federation(
        &self,
        federation_name: &str,
        local: ClusterId,
    ) -> Result<(), ConfigStoreError>;

    /// Subscribe to asynchronous config-store change notifications. The
    /// Membership Controller drains this under its update mutex.
    fn subscribe_updates(&self) -> tokio::sync::mpsc::Receiver<ConfigUpdate>;
}
