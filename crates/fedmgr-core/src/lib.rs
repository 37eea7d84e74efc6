//! Data model shared by every federation-manager crate: cluster and job
//! identifiers, sibling bitmasks, the federation record, and the binary
//! state-snapshot codec.
//!
//! This crate has no I/O and no async runtime dependency — it is the pure
//! data layer that `fedmgr-messages`, `fedmgr-transport`, and `fedmgr` build
//! on top of.

pub mod errors;
pub mod federation;
pub mod identifiers;
pub mod job;
pub mod snapshot;

pub use errors::FedCoreError;
pub use federation::{ClusterRecord, ClusterState, Federation};
pub use identifiers::{ClusterId, FedJobId, SiblingMask, LOCAL_ID_BITS, MAX_CLUSTERS};
pub use job::{FedJobInfo, RequeueHold, UPDATE_STALE_SECONDS};
pub use snapshot::{decode_snapshot, encode_snapshot, Snapshot, NO_VAL32, SNAPSHOT_PROTOCOL_VERSION};
