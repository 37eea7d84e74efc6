//! Error types for each out-of-scope collaborator contract.

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("database index not yet assigned")]
    DatabaseIndexNotAssigned,

    #[error("scheduler backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection to peer failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("peer connection not open")]
    NotOpen,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("unknown federation: {0}")]
    UnknownFederation(String),

    #[error("config store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StateSaveError {
    #[error("state-save directory is not writable: {0}")]
    NotWritable(String),

    #[error("atomic replace failed: {0}")]
    ReplaceFailed(String),
}
