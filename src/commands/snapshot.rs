use crate::commands::{connect, load_desired};
use crate::config::PgdeltaConfig;
use crate::db::introspect_schemas;
use crate::error::{PgdeltaError, Result};
use crate::schema::SchemaSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The schema file, after name translation
    Local,
    /// The live database
    Remote,
}

/// Snapshots of the managed schemas from either side.
pub async fn execute_snapshot(config: &PgdeltaConfig, source: SnapshotSource) -> Result<Vec<SchemaSnapshot>> {
    let (local, schemas) = load_desired(config)?;
    match source {
        SnapshotSource::Local => Ok(local),
        SnapshotSource::Remote => {
            let (client, _) = connect(config).await?;
            introspect_schemas(&client, &schemas).await
        }
    }
}

pub fn snapshots_to_json(snapshots: &[SchemaSnapshot]) -> Result<String> {
    serde_json::to_string_pretty(snapshots)
        .map_err(|e| PgdeltaError::Internal(format!("cannot serialize snapshot: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_local_snapshot_needs_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let schema_file = dir.path().join("schema.toml");
        fs::write(
            &schema_file,
            r#"
[[schemas]]
name = "public"

[[schemas.tables]]
name = "userAccounts"
columns = [{ name = "emailAddress", type = "text", nullable = false }]
"#,
        )
        .unwrap();
        let config = PgdeltaConfig {
            schema_file: Some(schema_file),
            ..PgdeltaConfig::default()
        };

        let snapshots = execute_snapshot(&config, SnapshotSource::Local).await.unwrap();
        assert_eq!(snapshots.len(), 1);

        let json: serde_json::Value = serde_json::from_str(&snapshots_to_json(&snapshots).unwrap()).unwrap();
        assert_eq!(json[0]["schema_name"], "public");
        assert!(json[0]["tables"]["user_accounts"]["columns"]["email_address"].is_object());
    }
}
