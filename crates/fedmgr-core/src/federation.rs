//! The federation record: peer list, per-peer state, and cluster lookups.
//!
//! This is the in-memory mirror of the config store's authoritative record.
//! The config store itself is an
//! external collaborator (`fedmgr-transport::ConfigStoreEffects`); this type
//! is what that collaborator hands back and what gets embedded, opaque to
//! the wire format, inside a state snapshot.

use crate::errors::FedCoreError;
use crate::identifiers::ClusterId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

bitflags::bitflags! {
    /// Per-peer state flags. `ACTIVE`/`INACTIVE` are the base state;
    /// `DRAIN`/`REMOVE` are orthogonal flags that may be OR'd in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ClusterState: u8 {
        const ACTIVE   = 0b0000_0001;
        const INACTIVE = 0b0000_0010;
        const DRAIN    = 0b0000_0100;
        const REMOVE   = 0b0000_1000;
    }
}

impl ClusterState {
    /// True if the base state is `ACTIVE` (regardless of `DRAIN`/`REMOVE`).
    pub fn is_active_base(self) -> bool {
        self.contains(ClusterState::ACTIVE)
    }

    /// True if the base state is `INACTIVE`.
    pub fn is_inactive_base(self) -> bool {
        self.contains(ClusterState::INACTIVE)
    }

    /// True if draining or being removed — ineligible for new submissions.
    pub fn is_drained(self) -> bool {
        self.contains(ClusterState::DRAIN) || self.contains(ClusterState::REMOVE)
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        ClusterState::ACTIVE
    }
}

/// A single peer's record within the federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub features: BTreeSet<String>,
    pub state: ClusterState,
}

/// An ordered collection of peers sharing one logical federation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Federation {
    pub name: String,
    pub clusters: Vec<ClusterRecord>,
}

impl Federation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clusters: Vec::new(),
        }
    }

    pub fn by_id(&self, id: ClusterId) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn by_id_mut(&mut self, id: ClusterId) -> Option<&mut ClusterRecord> {
        self.clusters.iter_mut().find(|c| c.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn resolve_names(&self, names: &[String]) -> Result<Vec<ClusterId>, FedCoreError> {
        names
            .iter()
            .map(|n| {
                self.by_name(n)
                    .map(|c| c.id)
                    .ok_or_else(|| FedCoreError::UnknownCluster(n.clone()))
            })
            .collect()
    }

    /// Render a sibling bitmask as a comma-joined list of cluster names.
    /// Mirrors the original `fed_mgr_cluster_ids_to_names` — used by logging and status reporting.
    pub fn cluster_ids_to_names(&self, mask: crate::identifiers::SiblingMask) -> String {
        mask.iter_ascending()
            .filter_map(|id| self.by_id(id).map(|c| c.name.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}
