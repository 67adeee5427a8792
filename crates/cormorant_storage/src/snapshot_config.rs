//! Hierarchical snapshot policy resolver.
//!
//! Resolution chain: system defaults -> project -> bucket -> table, each
//! layer a stored delta, deep-merged in order. The resolver also reports
//! which layer supplied every leaf.

use std::collections::HashMap;

use cormorant_catalog::{settings_entity_id, Catalog};
use cormorant_protocol::http_types::SnapshotType;
use cormorant_protocol::{ConfigSource, SnapshotConfig};

use crate::Result;

/// Auto-snapshot trigger names, matching the configuration leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    DropTable,
    TruncateTable,
    DeleteAllRows,
    DropColumn,
}

impl SnapshotTrigger {
    /// Snapshot type minted when this trigger fires.
    pub fn snapshot_type(&self) -> SnapshotType {
        match self {
            Self::DropTable => SnapshotType::AutoPredrop,
            Self::TruncateTable => SnapshotType::AutoPretruncate,
            Self::DeleteAllRows => SnapshotType::AutoPredelete,
            Self::DropColumn => SnapshotType::AutoPredropColumn,
        }
    }
}

/// Resolve the effective config for a scope, deep-merging stored layers
/// over the system defaults. Returns the merged config and the per-leaf
/// source map.
pub fn resolve_snapshot_config(
    catalog: &Catalog,
    project_id: &str,
    bucket_name: Option<&str>,
    table_name: Option<&str>,
) -> Result<(SnapshotConfig, HashMap<String, ConfigSource>)> {
    let mut config = SnapshotConfig::system_defaults();
    let mut sources = SnapshotConfig::system_sources();

    let (_, project_entity) = settings_entity_id(project_id, None, None);
    if let Some(patch) = catalog.get_snapshot_settings("project", &project_entity)? {
        config.apply_patch(&patch, ConfigSource::Project, &mut sources);
    }

    if let Some(bucket) = bucket_name {
        let (_, bucket_entity) = settings_entity_id(project_id, Some(bucket), None);
        if let Some(patch) = catalog.get_snapshot_settings("bucket", &bucket_entity)? {
            config.apply_patch(&patch, ConfigSource::Bucket, &mut sources);
        }

        if let Some(table) = table_name {
            let (_, table_entity) = settings_entity_id(project_id, Some(bucket), Some(table));
            if let Some(patch) = catalog.get_snapshot_settings("table", &table_entity)? {
                config.apply_patch(&patch, ConfigSource::Table, &mut sources);
            }
        }
    }

    Ok((config, sources))
}

/// Whether an auto snapshot must be taken before a destructive operation:
/// the master switch and the matching trigger must both be on.
pub fn should_create_snapshot(
    catalog: &Catalog,
    project_id: &str,
    bucket_name: &str,
    table_name: &str,
    trigger: SnapshotTrigger,
) -> Result<bool> {
    let (config, _) =
        resolve_snapshot_config(catalog, project_id, Some(bucket_name), Some(table_name))?;
    if !config.enabled {
        return Ok(false);
    }
    let triggers = &config.auto_snapshot_triggers;
    Ok(match trigger {
        SnapshotTrigger::DropTable => triggers.drop_table,
        SnapshotTrigger::TruncateTable => triggers.truncate_table,
        SnapshotTrigger::DeleteAllRows => triggers.delete_all_rows,
        SnapshotTrigger::DropColumn => triggers.drop_column,
    })
}

/// Retention period in days for a snapshot of the given type.
pub fn retention_days(
    catalog: &Catalog,
    project_id: &str,
    bucket_name: Option<&str>,
    table_name: Option<&str>,
    snapshot_type: SnapshotType,
) -> Result<u32> {
    let (config, _) = resolve_snapshot_config(catalog, project_id, bucket_name, table_name)?;
    Ok(if snapshot_type.is_manual() {
        config.retention.manual_days
    } else {
        config.retention.auto_days
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cormorant_catalog::Catalog;
    use cormorant_protocol::{SnapshotConfigPatch, SnapshotRetentionPatch, SnapshotTriggersPatch};
    use tempfile::TempDir;

    fn catalog() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(&dir.path().join("metadata.duckdb")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn test_defaults_without_overlays() {
        let (_dir, catalog) = catalog();
        let (config, sources) =
            resolve_snapshot_config(&catalog, "p1", Some("in"), Some("users")).unwrap();
        assert!(config.enabled);
        assert!(config.auto_snapshot_triggers.drop_table);
        assert!(sources.values().all(|s| *s == ConfigSource::System));
    }

    #[test]
    fn test_layered_resolution_with_sources() {
        let (_dir, catalog) = catalog();
        catalog
            .put_snapshot_settings(
                "project",
                "p1",
                &SnapshotConfigPatch {
                    retention: Some(SnapshotRetentionPatch {
                        manual_days: Some(30),
                        auto_days: None,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        catalog
            .put_snapshot_settings(
                "bucket",
                "p1/in",
                &SnapshotConfigPatch {
                    auto_snapshot_triggers: Some(SnapshotTriggersPatch {
                        truncate_table: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        catalog
            .put_snapshot_settings(
                "table",
                "p1/in/users",
                &SnapshotConfigPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let (config, sources) =
            resolve_snapshot_config(&catalog, "p1", Some("in"), Some("users")).unwrap();
        assert_eq!(config.retention.manual_days, 30);
        assert!(config.auto_snapshot_triggers.truncate_table);
        assert!(!config.enabled);
        assert_eq!(sources["retention.manual_days"], ConfigSource::Project);
        assert_eq!(
            sources["auto_snapshot_triggers.truncate_table"],
            ConfigSource::Bucket
        );
        assert_eq!(sources["enabled"], ConfigSource::Table);
        assert_eq!(sources["retention.auto_days"], ConfigSource::System);

        // A sibling table inherits bucket+project but not table overrides.
        let (other, other_sources) =
            resolve_snapshot_config(&catalog, "p1", Some("in"), Some("orders")).unwrap();
        assert!(other.enabled);
        assert_eq!(other_sources["enabled"], ConfigSource::System);
    }

    #[test]
    fn test_trigger_gating() {
        let (_dir, catalog) = catalog();
        // drop_table defaults on; truncate defaults off.
        assert!(should_create_snapshot(&catalog, "p1", "in", "users", SnapshotTrigger::DropTable)
            .unwrap());
        assert!(!should_create_snapshot(
            &catalog,
            "p1",
            "in",
            "users",
            SnapshotTrigger::TruncateTable
        )
        .unwrap());

        // Master switch off beats an enabled trigger.
        catalog
            .put_snapshot_settings(
                "project",
                "p1",
                &SnapshotConfigPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!should_create_snapshot(&catalog, "p1", "in", "users", SnapshotTrigger::DropTable)
            .unwrap());
    }

    #[test]
    fn test_retention_by_type() {
        let (_dir, catalog) = catalog();
        assert_eq!(
            retention_days(&catalog, "p1", None, None, SnapshotType::Manual).unwrap(),
            90
        );
        assert_eq!(
            retention_days(&catalog, "p1", None, None, SnapshotType::AutoPredrop).unwrap(),
            7
        );
    }
}
