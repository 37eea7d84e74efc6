//! Trait contracts for the federation manager's out-of-scope collaborators:
//! the local scheduler, persistent peer transport, federation config store,
//! and state-save directory. Pure contracts plus, behind the `testing`
//! feature, an in-memory fake of each.

pub mod config_store;
pub mod errors;
pub mod scheduler;
pub mod state_save;
pub mod transport;

#[cfg(feature = "testing")]
pub mod fakes;

pub use config_store::{ClusterModification, ConfigStoreEffects, ConfigUpdate, FederationModification};
pub use errors::{ConfigStoreError, SchedulerError, StateSaveError, TransportError};
pub use scheduler::{AllocateOutcome, JobRunState, SchedulerEffects};
pub use state_save::StateSaveEffects;
pub use transport::{InboundMessage, TransportEffects};
