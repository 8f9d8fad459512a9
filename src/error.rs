use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pgdelta
#[derive(Error, Debug)]
pub enum PgdeltaError {
    // Configuration Errors
    #[error("Foreign key {constraint} on {schema}.{table} references {target_schema}.{target_table}, which is not defined in any snapshot")]
    DanglingForeignKey {
        schema: String,
        table: String,
        constraint: String,
        target_schema: String,
        target_table: String,
    },

    #[error("Circular dependency between schemas: {0}")]
    SchemaCycle(String),

    #[error("Unsupported change to enum {schema}.{name}: {message}")]
    UnsupportedEnumChange {
        schema: String,
        name: String,
        message: String,
    },

    #[error("Duplicate {kind} name '{name}' in {owner}")]
    DuplicateObject {
        kind: &'static str,
        name: String,
        owner: String,
    },

    #[error("Cannot rename {kind} {from} to {to}: {message}")]
    RenameConflict {
        kind: &'static str,
        from: String,
        to: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration from {path}: {message}")]
    ConfigLoad {
        path: PathBuf,
        message: String,
    },

    #[error("Invalid schema file {path}: {message}")]
    SchemaFile {
        path: PathBuf,
        message: String,
    },

    // Database Errors
    #[error("Failed to connect to database: {message}")]
    DatabaseConnection {
        message: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Changeset {changeset} failed at statement {statement}: {message}")]
    StatementFailed {
        changeset: String,
        statement: usize,
        message: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error(transparent)]
    AdvisoryLock(#[from] crate::db::AdvisoryLockError),

    // File System Errors
    #[error("Failed to read {path}: {message}")]
    FileRead {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {message}")]
    FileWrite {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PgdeltaError {
    /// Configuration errors are raised before any changeset is compiled.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PgdeltaError::DanglingForeignKey { .. }
                | PgdeltaError::SchemaCycle(_)
                | PgdeltaError::UnsupportedEnumChange { .. }
                | PgdeltaError::DuplicateObject { .. }
                | PgdeltaError::RenameConflict { .. }
                | PgdeltaError::Configuration(_)
                | PgdeltaError::ConfigLoad { .. }
                | PgdeltaError::SchemaFile { .. }
        )
    }
}

impl From<tokio_postgres::Error> for PgdeltaError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() || err.to_string().contains("connect") {
            PgdeltaError::DatabaseConnection {
                message: err.to_string(),
                source: err,
            }
        } else {
            PgdeltaError::Database {
                message: err.to_string(),
                source: err,
            }
        }
    }
}

impl From<std::io::Error> for PgdeltaError {
    fn from(err: std::io::Error) -> Self {
        PgdeltaError::FileRead {
            path: PathBuf::from("unknown"),
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for PgdeltaError {
    fn from(err: toml::de::Error) -> Self {
        PgdeltaError::Configuration(format!("invalid TOML: {}", err))
    }
}

/// Result type alias for pgdelta operations
pub type Result<T> = std::result::Result<T, PgdeltaError>;

/// Helper function to format error with all its causes
pub fn format_error_chain(err: &PgdeltaError) -> String {
    use std::error::Error;

    let mut output = format!("Error: {}", err);

    let mut current_err: &dyn Error = err;
    while let Some(source) = current_err.source() {
        output.push_str(&format!("\n  Caused by: {}", source));
        current_err = source;
    }

    output
}

/// Helper function to suggest fixes for common errors
pub fn suggest_fix(err: &PgdeltaError) -> Option<String> {
    match err {
        PgdeltaError::DatabaseConnection { .. } => Some(
            "Suggestions:\n\
             - Check if PostgreSQL is running\n\
             - Verify the connection string is correct\n\
             - Try: psql <your-connection-string> to test the connection".to_string()
        ),
        PgdeltaError::InvalidConnectionString(_) => Some(
            "Connection string should be in format:\n\
             postgres://[user[:password]@][host][:port][/dbname]".to_string()
        ),
        PgdeltaError::DanglingForeignKey { target_schema, target_table, .. } => Some(
            format!("Table {}.{} is not declared in the schema file and does not exist in the database.\n\
                    - Declare the table, or add schema '{}' to the managed schemas\n\
                    - Check for typos in the foreign key target", target_schema, target_table, target_schema)
        ),
        PgdeltaError::SchemaCycle(details) => Some(
            format!("Schemas reference each other through foreign keys: {}\n\
                    - Move one side of the reference into the other schema", details)
        ),
        PgdeltaError::UnsupportedEnumChange { .. } => Some(
            "Enum values can only be added. To remove or reorder values, create a new type,\n\
             migrate the columns to it by hand and drop the old type.".to_string()
        ),
        PgdeltaError::StatementFailed { .. } => Some(
            "The failing statement was not retried. Inspect the database state before\n\
             re-running; statements before it have already been applied.".to_string()
        ),
        _ => None,
    }
}
