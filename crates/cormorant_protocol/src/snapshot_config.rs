//! Snapshot policy configuration with hierarchical inheritance.
//!
//! Configuration is resolved system -> project -> bucket -> table. Each
//! scope stores only its own delta ([`SnapshotConfigPatch`]); the merged
//! value is computed on demand so inheritance stays observable. Every
//! resolved leaf remembers which layer supplied it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum retention in days (10 years).
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Layer a resolved config value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    System,
    Project,
    Bucket,
    Table,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Project => "project",
            Self::Bucket => "bucket",
            Self::Table => "table",
        }
    }
}

/// Auto-snapshot triggers for destructive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTriggers {
    pub drop_table: bool,
    pub truncate_table: bool,
    pub delete_all_rows: bool,
    pub drop_column: bool,
}

/// Retention periods in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRetention {
    pub manual_days: u32,
    pub auto_days: u32,
}

/// Fully resolved snapshot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub auto_snapshot_triggers: SnapshotTriggers,
    pub retention: SnapshotRetention,
}

impl SnapshotConfig {
    /// Hard-coded system defaults, the base of every resolution chain.
    pub fn system_defaults() -> Self {
        Self {
            enabled: true,
            auto_snapshot_triggers: SnapshotTriggers {
                drop_table: true,
                truncate_table: false,
                delete_all_rows: false,
                drop_column: false,
            },
            retention: SnapshotRetention {
                manual_days: 90,
                auto_days: 7,
            },
        }
    }

    /// Source map with every leaf attributed to the system layer.
    pub fn system_sources() -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        for key in [
            "enabled",
            "auto_snapshot_triggers.drop_table",
            "auto_snapshot_triggers.truncate_table",
            "auto_snapshot_triggers.delete_all_rows",
            "auto_snapshot_triggers.drop_column",
            "retention.manual_days",
            "retention.auto_days",
        ] {
            sources.insert(key.to_string(), ConfigSource::System);
        }
        sources
    }

    /// Deep-merge a scope's delta into this config, attributing overridden
    /// leaves to `layer` in `sources`. `None` subkeys preserve the
    /// inherited value.
    pub fn apply_patch(
        &mut self,
        patch: &SnapshotConfigPatch,
        layer: ConfigSource,
        sources: &mut HashMap<String, ConfigSource>,
    ) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
            sources.insert("enabled".into(), layer);
        }
        if let Some(triggers) = &patch.auto_snapshot_triggers {
            if let Some(v) = triggers.drop_table {
                self.auto_snapshot_triggers.drop_table = v;
                sources.insert("auto_snapshot_triggers.drop_table".into(), layer);
            }
            if let Some(v) = triggers.truncate_table {
                self.auto_snapshot_triggers.truncate_table = v;
                sources.insert("auto_snapshot_triggers.truncate_table".into(), layer);
            }
            if let Some(v) = triggers.delete_all_rows {
                self.auto_snapshot_triggers.delete_all_rows = v;
                sources.insert("auto_snapshot_triggers.delete_all_rows".into(), layer);
            }
            if let Some(v) = triggers.drop_column {
                self.auto_snapshot_triggers.drop_column = v;
                sources.insert("auto_snapshot_triggers.drop_column".into(), layer);
            }
        }
        if let Some(retention) = &patch.retention {
            if let Some(v) = retention.manual_days {
                self.retention.manual_days = v;
                sources.insert("retention.manual_days".into(), layer);
            }
            if let Some(v) = retention.auto_days {
                self.retention.auto_days = v;
                sources.insert("retention.auto_days".into(), layer);
            }
        }
    }
}

/// Partial trigger overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotTriggersPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_table: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_table: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_all_rows: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_column: Option<bool>,
}

/// Partial retention overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotRetentionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_days: Option<u32>,
}

/// The delta a single scope stores. Unknown keys are rejected at
/// deserialization so misspelled settings fail loudly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_snapshot_triggers: Option<SnapshotTriggersPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<SnapshotRetentionPatch>,
}

impl SnapshotConfigPatch {
    /// Validate retention ranges (1..=3650 days).
    pub fn validate(&self) -> Result<(), String> {
        if let Some(retention) = &self.retention {
            for (name, value) in [
                ("manual_days", retention.manual_days),
                ("auto_days", retention.auto_days),
            ] {
                if let Some(days) = value {
                    if days < 1 {
                        return Err(format!("retention.{name} must be a positive integer"));
                    }
                    if days > MAX_RETENTION_DAYS {
                        return Err(format!(
                            "retention.{name} cannot exceed {MAX_RETENTION_DAYS} days"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.auto_snapshot_triggers.is_none()
            && self.retention.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_defaults() {
        let config = SnapshotConfig::system_defaults();
        assert!(config.enabled);
        assert!(config.auto_snapshot_triggers.drop_table);
        assert!(!config.auto_snapshot_triggers.truncate_table);
        assert_eq!(config.retention.manual_days, 90);
        assert_eq!(config.retention.auto_days, 7);
    }

    #[test]
    fn test_patch_merges_and_tracks_source() {
        let mut config = SnapshotConfig::system_defaults();
        let mut sources = SnapshotConfig::system_sources();

        let patch = SnapshotConfigPatch {
            enabled: None,
            auto_snapshot_triggers: Some(SnapshotTriggersPatch {
                truncate_table: Some(true),
                ..Default::default()
            }),
            retention: Some(SnapshotRetentionPatch {
                auto_days: Some(14),
                manual_days: None,
            }),
        };
        config.apply_patch(&patch, ConfigSource::Project, &mut sources);

        assert!(config.auto_snapshot_triggers.truncate_table);
        assert_eq!(config.retention.auto_days, 14);
        // Untouched leaves keep their inherited value and source.
        assert_eq!(config.retention.manual_days, 90);
        assert_eq!(sources["retention.manual_days"], ConfigSource::System);
        assert_eq!(sources["retention.auto_days"], ConfigSource::Project);
        assert_eq!(
            sources["auto_snapshot_triggers.truncate_table"],
            ConfigSource::Project
        );
    }

    #[test]
    fn test_patch_validation_ranges() {
        let ok = SnapshotConfigPatch {
            retention: Some(SnapshotRetentionPatch {
                manual_days: Some(1),
                auto_days: Some(3650),
            }),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let zero = SnapshotConfigPatch {
            retention: Some(SnapshotRetentionPatch {
                manual_days: Some(0),
                auto_days: None,
            }),
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let huge = SnapshotConfigPatch {
            retention: Some(SnapshotRetentionPatch {
                manual_days: None,
                auto_days: Some(3651),
            }),
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let bad: Result<SnapshotConfigPatch, _> =
            serde_json::from_str(r#"{"auto_snapshot_triggers": {"drop_everything": true}}"#);
        assert!(bad.is_err());
    }
}
