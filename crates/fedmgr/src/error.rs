//! The manager's unified error type: wraps every lower-crate error via
//! `#[from]`, giving callers one thiserror enum per crate boundary rather
//! than having to match on `fedmgr-core`, `fedmgr-messages`, and
//! `fedmgr-transport` errors separately.

use crate::config::loader::ConfigLoadError;
use fedmgr_core::FedCoreError;
use fedmgr_messages::WireError;
use fedmgr_transport::{ConfigStoreError, SchedulerError, StateSaveError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum FedMgrError {
    #[error(transparent)]
    Core(#[from] FedCoreError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    ConfigStore(#[from] ConfigStoreError),

    #[error(transparent)]
    StateSave(#[from] StateSaveError),

    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    /// A caller-facing policy violation ( class (c)): invalid
    /// cluster name, invalid feature, attempt to set `JobId` on submission,
    /// stale job id.
    #[error("policy violation: {0}")]
    Policy(String),

    /// A lock/unlock request denied because the job is already locked or has
    /// updates in flight ( class (d)). Retryable by the caller.
    #[error("lock denied: {0}")]
    LockDenied(String),
}

impl FedMgrError {
    pub fn policy(message: impl Into<String>) -> Self {
        FedMgrError::Policy(message.into())
    }

    pub fn lock_denied(message: impl Into<String>) -> Self {
        FedMgrError::LockDenied(message.into())
    }
}
