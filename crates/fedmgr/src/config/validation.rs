//! Invariant checks run once at startup, before any worker loop spawns.

use super::FedMgrConfig;
use std::fmt;

#[derive(Debug, Clone)]
pub enum ValidationError {
    Required { field: &'static str },
    OutOfRange { field: &'static str, min: u64, actual: u64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Required { field } => write!(f, "{field} must not be empty"),
            ValidationError::OutOfRange { field, min, actual } => {
                write!(f, "{field} must be at least {min}, got {actual}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Accumulates every violation rather than failing on the first one, so a
/// misconfigured deployment gets one complete error report.
pub struct ConfigValidator {
    errors: Vec<ValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn at_least(&mut self, field: &'static str, value: u64, min: u64) {
        if value < min {
            self.errors.push(ValidationError::OutOfRange {
                field,
                min,
                actual: value,
            });
        }
    }

    pub fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a loaded `FedMgrConfig`, accumulating every violation into one
/// report rather than failing on the first field checked.
pub fn validate(config: &FedMgrConfig) -> Result<(), Vec<ValidationError>> {
    let mut v = ConfigValidator::new();

    if config.state_save_dir.as_os_str().is_empty() {
        v.errors.push(ValidationError::Required {
            field: "state_save_dir",
        });
    }
    v.at_least("protocol_timeout_ms", config.protocol_timeout_ms, 1);
    v.at_least("agent_tick_secs", config.agent_tick_secs, 1);
    v.at_least("job_update_tick_secs", config.job_update_tick_secs, 1);
    v.at_least("ping_interval_secs", config.ping_interval_secs, 1);
    v.at_least("drain_watch_interval_secs", config.drain_watch_interval_secs, 1);
    v.at_least("comm_fail_log_window_secs", config.comm_fail_log_window_secs, 1);
    v.at_least("backoff_warn_at_secs", config.backoff_warn_at_secs, 2);
    v.at_least("update_retry_max", config.update_retry_max as u64, 1);
    v.at_least("update_stale_secs", config.update_stale_secs.max(0) as u64, 1);

    v.finish()
}
