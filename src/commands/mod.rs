pub mod apply;
pub mod generate;
pub mod plan;
#[cfg(feature = "cli")]
pub mod prompt;
pub mod snapshot;

pub use apply::{execute_apply, print_apply_summary, ApplyResult};
pub use generate::{execute_generate, GenerateResult};
pub use plan::{build_plan, execute_plan, print_plan_summary, PlanResult};
pub use snapshot::{execute_snapshot, SnapshotSource};

use crate::config::PgdeltaConfig;
use crate::db::{connect_to_database, DatabaseConfig};
use crate::error::Result;
use crate::local::load_schema_file;
use crate::rename::{Chain, DeclaredRenames, FixedRenames};
use crate::schema::SchemaSnapshot;
use tokio_postgres::Client;
use tracing::{info, warn};

/// Renames every command honors: the config's `[renames]` plus `renameFrom` hints.
pub fn default_prompt(config: &PgdeltaConfig) -> Chain<FixedRenames, DeclaredRenames> {
    Chain(config.fixed_renames(), DeclaredRenames)
}

/// Desired snapshots of the managed schemas, and the managed schema names.
///
/// Managed schemas default to the schemas the schema file declares. A schema
/// listed in the config but absent from the file is managed as empty, so its
/// live contents are planned for removal.
pub fn load_desired(config: &PgdeltaConfig) -> Result<(Vec<SchemaSnapshot>, Vec<String>)> {
    let declared = load_schema_file(&config.schema_file())?;
    let managed = match &config.schemas {
        Some(schemas) => schemas.clone(),
        None => declared.iter().map(|s| s.schema_name.clone()).collect(),
    };

    let mut local = Vec::with_capacity(declared.len());
    for snapshot in declared {
        if managed.contains(&snapshot.schema_name) {
            local.push(snapshot);
        } else {
            warn!(schema = %snapshot.schema_name, "schema is declared but not managed, skipping");
        }
    }
    Ok((local, managed))
}

/// Connect using the configured connection string.
pub async fn connect(config: &PgdeltaConfig) -> Result<(Client, DatabaseConfig)> {
    let database = DatabaseConfig::from_url(&config.connection_string()?)?;
    let client = connect_to_database(&database).await?;
    info!(database = %database.identity(), "connected");
    Ok((client, database))
}

