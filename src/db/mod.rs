pub mod catalog;
pub mod connection;
pub mod executor;
pub mod locks;

pub use catalog::{introspect_schema, introspect_schemas};
pub use connection::{connect_to_database, connect_with_url, DatabaseConfig};
pub use executor::{apply_changesets, rollback_changesets, ApplyReport, ExecutorOptions};
pub use locks::{AdvisoryLockError, AdvisoryLockManager};
