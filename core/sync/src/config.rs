//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kanisync_common::{Error, ResourceType, Result};

use crate::scheduler::SyncMode;

/// Default minimum fetch interval in seconds.
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 60;

/// Default event-name prefix.
pub const DEFAULT_NOTIFICATION_BASE: &str = "com.kanisync.notifications";

/// Engine configuration.
///
/// Intervals are in seconds. Types without an entry in `min_intervals` use
/// `default_min_interval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub default_min_interval: u64,
    pub min_intervals: BTreeMap<ResourceType, u64>,
    /// Events buffered per subscriber before slow ones start lagging.
    pub notification_capacity: usize,
    pub notification_base: String,
    pub sync_mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let mut min_intervals = BTreeMap::new();
        // Subjects rarely change
        min_intervals.insert(ResourceType::Subjects, 3600);

        Self {
            default_min_interval: DEFAULT_MIN_INTERVAL_SECS,
            min_intervals,
            notification_capacity: 64,
            notification_base: DEFAULT_NOTIFICATION_BASE.to_string(),
            sync_mode: SyncMode::Manual,
        }
    }
}

impl SyncConfig {
    /// Minimum fetch interval for a resource type.
    pub fn min_interval(&self, resource_type: ResourceType) -> Duration {
        let secs = self
            .min_intervals
            .get(&resource_type)
            .copied()
            .unwrap_or(self.default_min_interval);
        Duration::from_secs(secs)
    }

    /// Use the same interval for every type.
    pub fn with_uniform_interval(mut self, interval: Duration) -> Self {
        self.default_min_interval = interval.as_secs();
        self.min_intervals.clear();
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let config = SyncConfig::default();
        assert_eq!(config.min_interval(ResourceType::Assignments), Duration::from_secs(60));
        assert_eq!(config.min_interval(ResourceType::Subjects), Duration::from_secs(3600));
    }

    #[test]
    fn test_uniform_interval() {
        let config = SyncConfig::default().with_uniform_interval(Duration::ZERO);
        for rt in ResourceType::ALL {
            assert_eq!(config.min_interval(rt), Duration::ZERO);
        }
    }

    #[test]
    fn test_config_serialization() {
        let config = SyncConfig::default().with_sync_mode(SyncMode::Periodic {
            interval: Duration::from_secs(300),
        });

        let json = config.to_json().unwrap();
        assert!(json.contains("\"subjects\""));
        assert_eq!(SyncConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            SyncConfig::from_json(r#"{"min_intervals": {"review_statistics": 10}}"#).unwrap();
        assert_eq!(config.min_interval(ResourceType::ReviewStatistics), Duration::from_secs(10));
        assert_eq!(config.min_interval(ResourceType::Subjects), Duration::from_secs(60));
        assert_eq!(config.notification_base, DEFAULT_NOTIFICATION_BASE);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SyncConfig::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, r#"{"default_min_interval": 5}"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.min_interval(ResourceType::User), Duration::from_secs(5));
        assert!(matches!(
            SyncConfig::load(&dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
