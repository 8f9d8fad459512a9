//! Declarative PostgreSQL schema migrations.
//!
//! A desired [`SchemaSnapshot`] (from a schema file) is compared with the live
//! one (read from the catalogs) and the difference is compiled into ordered,
//! reversible [`Changeset`]s:
//!
//! ```no_run
//! use pgdelta::{plan_changesets, CompileOptions, NoRenames, SchemaSnapshot};
//! use pgdelta::schema::{ColumnDefinition, TableDefinition};
//!
//! let desired = vec![SchemaSnapshot::new("public").with_table(
//!     TableDefinition::new("books")
//!         .with_column(ColumnDefinition::new("id", "integer"))
//!         .with_primary_key(&["id"]),
//! )];
//! let changesets = plan_changesets(&desired, &[], &NoRenames, &CompileOptions::default())?;
//! for changeset in &changesets {
//!     for statement in &changeset.up {
//!         println!("{};", statement.sql);
//!     }
//! }
//! # Ok::<(), pgdelta::PgdeltaError>(())
//! ```

pub mod analysis;
#[cfg(feature = "cli")]
pub mod cli;
pub mod commands;
pub mod compile;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod local;
pub mod logging;
pub mod migration;
pub mod naming;
pub mod output;
pub mod planner;
pub mod priority;
pub mod rename;
pub mod schema;

pub use compile::{compile, Changeset, CompileOptions, Statement};
pub use config::PgdeltaConfig;
pub use diff::{diff_snapshots, Diff, DiffKind, DiffType};
pub use error::{PgdeltaError, Result};
pub use planner::{plan_changesets, plan_diffs};
pub use priority::{schedule, Priority};
pub use rename::{DeclaredRenames, FixedRenames, NoRenames, RenameMap, RenamePrompt};
pub use schema::SchemaSnapshot;
