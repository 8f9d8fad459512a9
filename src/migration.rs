//! Rendering a plan as a pair of migration files.

use crate::compile::{Changeset, Statement};
use crate::error::{PgdeltaError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMigration {
    /// `<YYYYMMDDHHMMSS>_<name>`
    pub stem: String,
    pub up: String,
    pub down: String,
}

/// Render `changesets` into forward and backward SQL scripts.
///
/// The backward script lists changesets in reverse. Non-transactional
/// statements are marked so readers know not to wrap the file in a
/// transaction.
pub fn render_migration(changesets: &[Changeset], name: &str, timestamp: DateTime<Utc>) -> RenderedMigration {
    let stem = format!("{}_{}", timestamp.format("%Y%m%d%H%M%S"), sanitize(name));
    let header = format!("-- {} generated {}\n", stem, timestamp.to_rfc3339());

    let mut up = header.clone();
    for changeset in changesets {
        render_section(&mut up, changeset, &changeset.up);
    }

    let mut down = header;
    for changeset in changesets.iter().rev() {
        render_section(&mut down, changeset, &changeset.down);
    }

    RenderedMigration { stem, up, down }
}

fn render_section(out: &mut String, changeset: &Changeset, statements: &[Statement]) {
    out.push_str(&format!("\n-- {} {}\n", changeset.diff_type, changeset.label()));
    if statements.is_empty() {
        out.push_str("-- (no statements)\n");
    }
    for statement in statements {
        if !statement.transactional {
            out.push_str("-- non-transactional\n");
        }
        out.push_str(statement.sql.trim_end_matches(';'));
        out.push_str(";\n");
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "migration".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write `<stem>.up.sql` and `<stem>.down.sql` into `dir`, creating it if needed.
pub fn write_migration(dir: &Path, migration: &RenderedMigration) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir).map_err(|e| PgdeltaError::FileWrite {
        path: dir.to_path_buf(),
        message: "cannot create migrations directory".into(),
        source: e,
    })?;

    let up_path = dir.join(format!("{}.up.sql", migration.stem));
    let down_path = dir.join(format!("{}.down.sql", migration.stem));
    for (path, content) in [(&up_path, &migration.up), (&down_path, &migration.down)] {
        fs::write(path, content).map_err(|e| PgdeltaError::FileWrite {
            path: path.clone(),
            message: "cannot write migration".into(),
            source: e,
        })?;
    }

    info!(up = %up_path.display(), down = %down_path.display(), "wrote migration");
    Ok((up_path, down_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile, CompileOptions};
    use crate::diff::{Diff, DiffKind};
    use crate::schema::{ColumnDefinition, EnumDefinition};
    use chrono::TimeZone;

    fn changesets() -> Vec<Changeset> {
        let diffs = vec![
            Diff::new(
                "public",
                None,
                Some("mood"),
                DiffKind::CreateEnum {
                    definition: EnumDefinition::new("mood", &["happy", "sad"]),
                },
            ),
            Diff::new(
                "public",
                Some("books"),
                Some("title"),
                DiffKind::CreateColumn {
                    column: ColumnDefinition::new("title", "text"),
                },
            ),
        ];
        compile(&diffs, &CompileOptions::default())
    }

    #[test]
    fn test_render_migration() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let migration = render_migration(&changesets(), "Add books title", timestamp);

        assert_eq!(migration.stem, "20240309140507_add_books_title");

        let up_create = migration.up.find("-- createEnum public.mood").unwrap();
        let up_column = migration.up.find("-- createColumn public.books.title").unwrap();
        assert!(up_create < up_column);

        let down_create = migration.down.find("-- createEnum public.mood").unwrap();
        let down_column = migration.down.find("-- createColumn public.books.title").unwrap();
        assert!(down_column < down_create);
        assert!(migration.up.contains("CREATE TYPE"));
        assert!(migration.down.contains("DROP TYPE"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  "), "migration");
        assert_eq!(sanitize("rename/books"), "rename_books");
    }

    #[test]
    fn test_write_migration() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("migrations");
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let migration = render_migration(&changesets(), "init", timestamp);

        let (up, down) = write_migration(&target, &migration).unwrap();
        assert_eq!(up.file_name().unwrap(), "20240101000000_init.up.sql");
        assert_eq!(down.file_name().unwrap(), "20240101000000_init.down.sql");
        assert_eq!(fs::read_to_string(up).unwrap(), migration.up);
    }
}
