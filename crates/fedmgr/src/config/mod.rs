//! Manager configuration: the knobs that govern agent and job-update wake
//! intervals, ping cadence, comm-fail log window, the backoff schedule
//! bound, and the `UPDATE` retry policy, collected into one TOML-loadable
//! struct.

pub mod loader;
pub mod validation;

use std::path::PathBuf;

/// Runtime configuration for one federation manager instance.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FedMgrConfig {
    /// Directory the `fed_mgr_state` snapshot is written to.
    pub state_save_dir: PathBuf,

    /// Timeout for the synchronous lock/unlock RPCs and the agent's batched
    /// send/recv, converted to milliseconds.
    pub protocol_timeout_ms: u64,

    /// Agent Loop's periodic wake interval absent a broadcast.
    pub agent_tick_secs: u64,

    /// Job-Update Loop's periodic wake interval absent a broadcast.
    pub job_update_tick_secs: u64,

    /// Ping Loop's fixed poll interval.
    pub ping_interval_secs: u64,

    /// Drain Watcher's wake interval.
    pub drain_watch_interval_secs: u64,

    /// How often a comm-fail condition for the same peer may be logged.
    pub comm_fail_log_window_secs: u64,

    /// The backoff step at which the agent logs a one-shot warning and
    /// keeps doubling rather than capping outright.
    pub backoff_warn_at_secs: u64,

    /// Max attempts for `UPDATE` while the scheduler reports its "database
    /// index not yet assigned" transient.
    pub update_retry_max: u32,

    /// Delay between `UPDATE` retry attempts.
    pub update_retry_delay_ms: u64,

    /// Window within which an in-flight peer update blocks lock acquisition.
    pub update_stale_secs: i64,
}

impl Default for FedMgrConfig {
    fn default() -> Self {
        Self {
            state_save_dir: PathBuf::from("/var/spool/fedmgr"),
            protocol_timeout_ms: 10_000,
            agent_tick_secs: 2,
            job_update_tick_secs: 2,
            ping_interval_secs: 5,
            drain_watch_interval_secs: 30,
            comm_fail_log_window_secs: 600,
            backoff_warn_at_secs: 128,
            update_retry_max: 5,
            update_retry_delay_ms: 1_000,
            update_stale_secs: fedmgr_core::UPDATE_STALE_SECONDS,
        }
    }
}
