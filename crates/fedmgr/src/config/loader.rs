//! Loads a `FedMgrConfig` from a TOML file and validates it before handing
//! it back, so the manager never starts on a configuration that would trip
//! an invariant mid-run.

use super::validation::{self, ValidationError};
use super::FedMgrConfig;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("configuration invalid: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<ValidationError>),
}

/// Load and validate a `FedMgrConfig` from a TOML file on disk.
pub fn load_from_file(path: &Path) -> Result<FedMgrConfig, ConfigLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_from_str(&content, path)
}

fn load_from_str(content: &str, path: &Path) -> Result<FedMgrConfig, ConfigLoadError> {
    let config: FedMgrConfig = toml::from_str(content).map_err(|source| ConfigLoadError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    validation::validate(&config).map_err(ConfigLoadError::Invalid)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ping_interval_secs = 7").unwrap();
        let cfg = load_from_file(file.path()).unwrap();
        assert_eq!(cfg.ping_interval_secs, 7);
        // unspecified fields fall back to defaults via #[serde(default)]
        assert_eq!(cfg.agent_tick_secs, 2);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "protocol_timeout_ms = 0").unwrap();
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        assert!(load_from_file(Path::new("/nonexistent/fedmgr.toml")).is_err());
    }
}
