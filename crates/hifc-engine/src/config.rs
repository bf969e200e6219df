use std::path::Path;
use std::time::Duration;

use hifc_frame::DEFAULT_TRACE_CAPACITY;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const MAX_TASK_POOL: usize = 4096;

/// Engine configuration.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait for synchronous work, in milliseconds.
    pub sync_timeout_ms: u64,
    /// Number of work records that may exist at once.
    pub task_pool_size: usize,
    /// Hold outbound sends until the controller reports a free write buffer.
    pub gate_sends_on_write_ready: bool,
    /// Name of the worker thread.
    pub worker_name: String,
    /// Capacity of the default in-memory trace buffer.
    pub trace_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 1000,
            task_pool_size: 64,
            gate_sends_on_write_ready: true,
            worker_name: "hifc-worker".to_string(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_timeout_ms == 0 {
            return Err(EngineError::Config(
                "sync_timeout_ms must be greater than zero".to_string(),
            ));
        }
        // A pass, its unmask, and one spawned item per examined bit.
        if self.task_pool_size < 4 || self.task_pool_size > MAX_TASK_POOL {
            return Err(EngineError::Config(format!(
                "task_pool_size must be between 4 and {MAX_TASK_POOL}"
            )));
        }
        if self.worker_name.is_empty() {
            return Err(EngineError::Config(
                "worker_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync_timeout(), Duration::from_secs(1));
        assert!(config.gate_sends_on_write_ready);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"sync_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.sync_timeout_ms, 250);
        assert_eq!(config.task_pool_size, 64);
        assert_eq!(config.worker_name, "hifc-worker");
    }

    #[test]
    fn invalid_values_rejected() {
        let err = EngineConfig::from_json_str(r#"{"sync_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{"task_pool_size": 1}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{"worker_name": ""}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn malformed_json_reported() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, EngineError::Json(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_json_file("/nonexistent/hifc.json").unwrap_err();
        assert!(matches!(err, EngineError::ConfigIo { .. }));
        assert!(err.to_string().contains("/nonexistent/hifc.json"));
    }
}
