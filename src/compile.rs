//! DDL compilation.
//!
//! Every scheduled [`Diff`] becomes a [`Changeset`] with forward (`up`) and
//! inverse (`down`) statements. Changes that would hold long locks on
//! populated tables use the non-blocking forms:
//!
//! - NOT NULL goes through a temporary `CHECK (col IS NOT NULL) NOT VALID`
//!   that is validated, then `SET NOT NULL`, then dropped.
//! - Foreign keys and checks are added `NOT VALID` and validated separately.
//! - Unique and primary keys on existing tables are built with
//!   `CREATE UNIQUE INDEX CONCURRENTLY` and attached with `USING INDEX`.
//!
//! Objects whose content is compared by hash get a `COMMENT ON ... IS '<hash>'`
//! in the same changeset that creates them.

use crate::diff::{Diff, DiffKind, DiffType, EnumPosition, Rehash};
use crate::naming::{generated_name, qualified, quote_ident, quote_literal, NameKind};
use crate::priority::Priority;
use crate::schema::{
    CheckConstraintDefinition, ColumnDefinition, DefaultValue, ForeignKeyDefinition, Identity,
    IndexDefinition, PrimaryKeyDefinition, ReferentialAction, TableDefinition, TriggerDefinition,
    UniqueConstraintDefinition,
};
use serde::Serialize;
use tracing::debug;

/// One executable SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub sql: String,
    /// Idempotent statement to run if `sql` fails, before the error is raised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    /// `false` for statements Postgres refuses inside a transaction block.
    pub transactional: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            cleanup: None,
            transactional: true,
        }
    }

    pub fn non_transactional(sql: impl Into<String>) -> Self {
        Self {
            transactional: false,
            ..Self::new(sql)
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = Some(cleanup.into());
        self
    }
}

/// A compiled diff, ready for execution or for a migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    pub schema: String,
    pub table: Option<String>,
    pub object_name: Option<String>,
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    pub priority: Priority,
    pub up: Vec<Statement>,
    pub down: Vec<Statement>,
}

impl Changeset {
    /// `schema.table.object`, skipping absent parts.
    pub fn label(&self) -> String {
        let mut label = self.schema.clone();
        for part in [&self.table, &self.object_name].into_iter().flatten() {
            label.push('.');
            label.push_str(part);
        }
        label
    }

    pub fn is_transactional(&self) -> bool {
        self.up.iter().all(|s| s.transactional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Build indexes on existing tables with `CONCURRENTLY`.
    pub concurrent_indexes: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            concurrent_indexes: true,
        }
    }
}

/// Compile scheduled diffs, keeping their order.
pub fn compile(diffs: &[Diff], options: &CompileOptions) -> Vec<Changeset> {
    let changesets: Vec<Changeset> = diffs.iter().map(|d| compile_diff(d, options)).collect();
    debug!(count = changesets.len(), "compiled changesets");
    changesets
}

pub fn compile_diff(diff: &Diff, options: &CompileOptions) -> Changeset {
    let target = Target {
        schema: &diff.schema,
        table: diff.table.as_deref().unwrap_or_default(),
    };
    let (up, down) = target.statements(&diff.kind, options);
    Changeset {
        schema: diff.schema.clone(),
        table: diff.table.clone(),
        object_name: diff.object_name.clone(),
        diff_type: diff.diff_type(),
        priority: Priority::of(&diff.kind),
        up,
        down,
    }
}

type Statements = (Vec<Statement>, Vec<Statement>);

/// Schema and table a diff addresses.
struct Target<'a> {
    schema: &'a str,
    table: &'a str,
}

impl Target<'_> {
    fn table_name(&self) -> String {
        qualified(self.schema, self.table)
    }

    fn alter(&self, clause: impl AsRef<str>) -> Statement {
        Statement::new(format!("ALTER TABLE {} {}", self.table_name(), clause.as_ref()))
    }

    fn alter_column(&self, column: &str, clause: impl AsRef<str>) -> Statement {
        self.alter(format!("ALTER COLUMN {} {}", quote_ident(column), clause.as_ref()))
    }

    fn drop_constraint(&self, name: &str) -> Statement {
        self.alter(format!("DROP CONSTRAINT {}", quote_ident(name)))
    }

    fn rename_constraint(&self, from: &str, to: &str) -> Statement {
        self.alter(format!("RENAME CONSTRAINT {} TO {}", quote_ident(from), quote_ident(to)))
    }

    fn validate_constraint(&self, name: &str) -> Statement {
        self.alter(format!("VALIDATE CONSTRAINT {}", quote_ident(name)))
    }

    fn comment_on_constraint(&self, name: &str, hash: &str) -> Statement {
        Statement::new(format!(
            "COMMENT ON CONSTRAINT {} ON {} IS {}",
            quote_ident(name),
            self.table_name(),
            quote_literal(hash)
        ))
    }

    fn comment_on_column(&self, column: &str, hash: Option<&str>) -> Statement {
        let value = match hash {
            Some(hash) if !hash.is_empty() => quote_literal(hash),
            _ => "NULL".to_string(),
        };
        Statement::new(format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            self.table_name(),
            quote_ident(column),
            value
        ))
    }

    fn index_name(&self, name: &str) -> String {
        qualified(self.schema, name)
    }

    fn statements(&self, kind: &DiffKind, options: &CompileOptions) -> Statements {
        let schema = quote_ident(self.schema);
        match kind {
            DiffKind::CreateSchema => (
                vec![Statement::new(format!("CREATE SCHEMA {}", schema))],
                vec![Statement::new(format!("DROP SCHEMA {}", schema))],
            ),
            DiffKind::DropSchema => (
                vec![Statement::new(format!("DROP SCHEMA {}", schema))],
                vec![Statement::new(format!("CREATE SCHEMA {}", schema))],
            ),
            DiffKind::CreateExtension { name } => (
                vec![self.create_extension(name)],
                vec![drop_extension(name)],
            ),
            DiffKind::DropExtension { name } => (
                vec![drop_extension(name)],
                vec![self.create_extension(name)],
            ),
            DiffKind::CreateEnum { definition } => (
                vec![self.create_enum(&definition.name, &definition.values)],
                vec![self.drop_enum(&definition.name)],
            ),
            DiffKind::DropEnum { definition } => (
                vec![self.drop_enum(&definition.name)],
                vec![self.create_enum(&definition.name, &definition.values)],
            ),
            DiffKind::ChangeEnum { name, added } => {
                let up = added
                    .iter()
                    .map(|addition| {
                        let anchor = match &addition.position {
                            EnumPosition::Before(value) => format!(" BEFORE {}", quote_literal(value)),
                            EnumPosition::After(value) => format!(" AFTER {}", quote_literal(value)),
                            EnumPosition::End => String::new(),
                        };
                        Statement::non_transactional(format!(
                            "ALTER TYPE {} ADD VALUE {}{}",
                            qualified(self.schema, name),
                            quote_literal(&addition.value),
                            anchor
                        ))
                    })
                    .collect();
                // Enum values cannot be removed.
                (up, Vec::new())
            }

            DiffKind::CreateTable { definition } => {
                (self.create_table(definition), vec![self.drop_table()])
            }
            DiffKind::DropTable { definition } => {
                (vec![self.drop_table()], self.create_table(definition))
            }
            DiffKind::ChangeTable { from, to } => (
                vec![rename_table(self.schema, from, to)],
                vec![rename_table(self.schema, to, from)],
            ),

            DiffKind::CreateColumn { column } => (self.add_column(column), vec![self.drop_column(&column.name)]),
            DiffKind::DropColumn { column } => (vec![self.drop_column(&column.name)], self.add_column(column)),
            DiffKind::ChangeColumnName { from, to } => (
                vec![self.rename_column(from, to)],
                vec![self.rename_column(to, from)],
            ),
            DiffKind::ChangeColumn { column, from_type, to_type } => (
                vec![self.change_type(column, to_type)],
                vec![self.change_type(column, from_type)],
            ),
            DiffKind::ChangeColumnIdentity { column, from, to, set_not_null } => {
                let mut up = Vec::new();
                if *set_not_null {
                    up.extend(self.set_not_null(column));
                }
                up.push(self.change_identity(column, *from, *to));
                let mut down = vec![self.change_identity(column, *to, *from)];
                if *set_not_null {
                    down.push(self.alter_column(column, "DROP NOT NULL"));
                }
                (up, down)
            }
            DiffKind::SetColumnDefault { column, value, previous } => {
                let down = match previous {
                    Some(previous) => self.set_default(column, previous),
                    None => self.drop_default(column),
                };
                (self.set_default(column, value), down)
            }
            DiffKind::DropColumnDefault { column, previous } => {
                (self.drop_default(column), self.set_default(column, previous))
            }
            DiffKind::SetColumnNotNull { column } => (
                self.set_not_null(column),
                vec![self.alter_column(column, "DROP NOT NULL")],
            ),
            DiffKind::DropColumnNotNull { column } => (
                vec![self.alter_column(column, "DROP NOT NULL")],
                vec![self.alter_column(column, "SET NOT NULL")],
            ),

            DiffKind::CreatePrimaryKey { primary_key, nullable_columns, on_existing_table } => {
                let mut up = Vec::new();
                for column in nullable_columns {
                    up.extend(self.set_not_null(column));
                }
                if *on_existing_table && options.concurrent_indexes {
                    up.extend(self.key_via_index(
                        &primary_key.name,
                        &primary_key.columns,
                        "",
                        "PRIMARY KEY",
                    ));
                } else {
                    up.push(self.add_primary_key(primary_key));
                }
                let mut down = vec![self.drop_constraint(&primary_key.name)];
                down.extend(
                    nullable_columns
                        .iter()
                        .map(|column| self.alter_column(column, "DROP NOT NULL")),
                );
                (up, down)
            }
            DiffKind::DropPrimaryKey { primary_key } => (
                vec![self.drop_constraint(&primary_key.name)],
                vec![self.add_primary_key(primary_key)],
            ),
            DiffKind::CreateUniqueConstraint { unique, on_existing_table } => {
                let up = if *on_existing_table && options.concurrent_indexes {
                    let nulls = if unique.nulls_distinct { "" } else { " NULLS NOT DISTINCT" };
                    self.key_via_index(&unique.name, &unique.columns, nulls, "UNIQUE")
                } else {
                    vec![self.add_unique(unique)]
                };
                (up, vec![self.drop_constraint(&unique.name)])
            }
            DiffKind::DropUniqueConstraint { unique } => (
                vec![self.drop_constraint(&unique.name)],
                vec![self.add_unique(unique)],
            ),
            DiffKind::CreateForeignKey { foreign_key } => (
                vec![
                    self.alter(format!("{} NOT VALID", foreign_key_clause(foreign_key))),
                    self.validate_constraint(&foreign_key.name),
                ],
                vec![self.drop_constraint(&foreign_key.name)],
            ),
            DiffKind::DropForeignKey { foreign_key } => (
                vec![self.drop_constraint(&foreign_key.name)],
                vec![self.alter(foreign_key_clause(foreign_key))],
            ),
            DiffKind::CreateCheckConstraint { check } => (
                vec![
                    self.alter(format!("{} NOT VALID", check_clause(check))),
                    self.validate_constraint(&check.name),
                    self.comment_on_constraint(&check.name, &check.content_hash),
                ],
                vec![self.drop_constraint(&check.name)],
            ),
            DiffKind::DropCheckConstraint { check } => (
                vec![self.drop_constraint(&check.name)],
                vec![
                    self.alter(check_clause(check)),
                    self.comment_on_constraint(&check.name, &check.content_hash),
                ],
            ),
            DiffKind::RenameConstraint { from, to, rehash } => self.rename_with_rehash(
                from,
                to,
                rehash.as_ref(),
                |from, to| self.rename_constraint(from, to),
                |name, hash| self.comment_on_constraint(name, hash),
            ),

            DiffKind::CreateIndex { index, on_existing_table } => {
                let concurrently = *on_existing_table && options.concurrent_indexes;
                (
                    self.create_index(index, concurrently),
                    vec![self.drop_index(&index.name, concurrently)],
                )
            }
            DiffKind::DropIndex { index, on_existing_table } => {
                let concurrently = *on_existing_table && options.concurrent_indexes;
                (
                    vec![self.drop_index(&index.name, concurrently)],
                    self.create_index(index, concurrently),
                )
            }
            DiffKind::ChangeIndex { from, to, rehash } => self.rename_with_rehash(
                from,
                to,
                rehash.as_ref(),
                |from, to| self.rename_index(from, to),
                |name, hash| self.comment_on_index(name, hash),
            ),

            DiffKind::CreateTrigger { trigger } => {
                (self.create_trigger(trigger), vec![self.drop_trigger(&trigger.name)])
            }
            DiffKind::DropTrigger { trigger } => {
                (vec![self.drop_trigger(&trigger.name)], self.create_trigger(trigger))
            }
            DiffKind::RenameTrigger { from, to, rehash } => self.rename_with_rehash(
                from,
                to,
                rehash.as_ref(),
                |from, to| self.rename_trigger(from, to),
                |name, hash| self.comment_on_trigger(name, hash),
            ),
        }
    }

    /// Rename, then restamp the stored hash under the new name. Either half
    /// may be absent.
    fn rename_with_rehash(
        &self,
        from: &str,
        to: &str,
        rehash: Option<&Rehash>,
        rename: impl Fn(&str, &str) -> Statement,
        comment: impl Fn(&str, &str) -> Statement,
    ) -> Statements {
        let mut up = Vec::new();
        let mut down = Vec::new();
        if from != to {
            up.push(rename(from, to));
        }
        if let Some(rehash) = rehash {
            up.push(comment(to, &rehash.to));
            down.push(comment(to, &rehash.from));
        }
        if from != to {
            down.push(rename(to, from));
        }
        (up, down)
    }

    fn create_extension(&self, name: &str) -> Statement {
        Statement::new(format!(
            "CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {}",
            quote_ident(name),
            quote_ident(self.schema)
        ))
    }

    fn create_enum(&self, name: &str, values: &[String]) -> Statement {
        let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
        Statement::new(format!(
            "CREATE TYPE {} AS ENUM ({})",
            qualified(self.schema, name),
            values.join(", ")
        ))
    }

    fn drop_enum(&self, name: &str) -> Statement {
        Statement::new(format!("DROP TYPE {}", qualified(self.schema, name)))
    }

    /// `CREATE TABLE` with columns only, plus default-hash comments.
    fn create_table(&self, table: &TableDefinition) -> Vec<Statement> {
        let columns: Vec<String> = table
            .columns
            .values()
            .map(|c| format!("  {}", column_clause(c)))
            .collect();
        let mut statements = vec![Statement::new(format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table_name(),
            columns.join(",\n")
        ))];
        statements.extend(table.columns.values().filter_map(|c| {
            c.default_value
                .as_ref()
                .map(|d| self.comment_on_column(&c.name, Some(&d.content_hash)))
        }));
        statements
    }

    fn drop_table(&self) -> Statement {
        Statement::new(format!("DROP TABLE {}", self.table_name()))
    }

    fn add_column(&self, column: &ColumnDefinition) -> Vec<Statement> {
        let mut statements = vec![self.alter(format!("ADD COLUMN {}", column_clause(column)))];
        if let Some(default) = &column.default_value {
            statements.push(self.comment_on_column(&column.name, Some(&default.content_hash)));
        }
        statements
    }

    fn drop_column(&self, column: &str) -> Statement {
        self.alter(format!("DROP COLUMN {}", quote_ident(column)))
    }

    fn rename_column(&self, from: &str, to: &str) -> Statement {
        self.alter(format!("RENAME COLUMN {} TO {}", quote_ident(from), quote_ident(to)))
    }

    fn change_type(&self, column: &str, data_type: &str) -> Statement {
        self.alter_column(
            column,
            format!("TYPE {} USING {}::{}", data_type, quote_ident(column), data_type),
        )
    }

    fn change_identity(&self, column: &str, from: Identity, to: Identity) -> Statement {
        let clause = match (from, to.clause()) {
            (_, None) => "DROP IDENTITY".to_string(),
            (Identity::None, Some(clause)) => format!("ADD {}", clause),
            (_, Some(_)) if to == Identity::Always => "SET GENERATED ALWAYS".to_string(),
            (_, Some(_)) => "SET GENERATED BY DEFAULT".to_string(),
        };
        self.alter_column(column, clause)
    }

    fn set_default(&self, column: &str, value: &DefaultValue) -> Vec<Statement> {
        vec![
            self.alter_column(column, format!("SET DEFAULT {}", value.sql)),
            self.comment_on_column(column, Some(&value.content_hash)),
        ]
    }

    fn drop_default(&self, column: &str) -> Vec<Statement> {
        vec![
            self.alter_column(column, "DROP DEFAULT"),
            self.comment_on_column(column, None),
        ]
    }

    /// NOT NULL without a long exclusive scan.
    fn set_not_null(&self, column: &str) -> Vec<Statement> {
        let check = generated_name(self.table, NameKind::NotNullCheck { column });
        vec![
            self.alter(format!(
                "ADD CONSTRAINT {} CHECK ({} IS NOT NULL) NOT VALID",
                quote_ident(&check),
                quote_ident(column)
            )),
            self.validate_constraint(&check),
            self.alter_column(column, "SET NOT NULL"),
            self.drop_constraint(&check),
        ]
    }

    fn add_primary_key(&self, primary_key: &PrimaryKeyDefinition) -> Statement {
        self.alter(format!(
            "ADD CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&primary_key.name),
            column_list(&primary_key.columns)
        ))
    }

    fn add_unique(&self, unique: &UniqueConstraintDefinition) -> Statement {
        let nulls = if unique.nulls_distinct { "" } else { " NULLS NOT DISTINCT" };
        self.alter(format!(
            "ADD CONSTRAINT {} UNIQUE{} ({})",
            quote_ident(&unique.name),
            nulls,
            column_list(&unique.columns)
        ))
    }

    /// Build the backing unique index concurrently, then attach it.
    fn key_via_index(&self, name: &str, columns: &[String], nulls: &str, kind: &str) -> Vec<Statement> {
        let index = self.index_name(name);
        vec![
            Statement::non_transactional(format!(
                "CREATE UNIQUE INDEX CONCURRENTLY {} ON {} ({}){}",
                quote_ident(name),
                self.table_name(),
                column_list(columns),
                nulls
            ))
            .with_cleanup(format!("DROP INDEX IF EXISTS {}", index)),
            self.alter(format!(
                "ADD CONSTRAINT {} {} USING INDEX {}",
                quote_ident(name),
                kind,
                quote_ident(name)
            )),
        ]
    }

    fn create_index(&self, index: &IndexDefinition, concurrently: bool) -> Vec<Statement> {
        let sql = index.definition(self.schema, self.table, concurrently);
        let create = if concurrently {
            Statement::non_transactional(sql)
                .with_cleanup(format!("DROP INDEX IF EXISTS {}", self.index_name(&index.name)))
        } else {
            Statement::new(sql)
        };
        vec![create, self.comment_on_index(&index.name, &index.content_hash)]
    }

    fn comment_on_index(&self, name: &str, hash: &str) -> Statement {
        Statement::new(format!(
            "COMMENT ON INDEX {} IS {}",
            self.index_name(name),
            quote_literal(hash)
        ))
    }

    fn drop_index(&self, name: &str, concurrently: bool) -> Statement {
        if concurrently {
            Statement::non_transactional(format!("DROP INDEX CONCURRENTLY {}", self.index_name(name)))
        } else {
            Statement::new(format!("DROP INDEX {}", self.index_name(name)))
        }
    }

    fn rename_index(&self, from: &str, to: &str) -> Statement {
        Statement::new(format!(
            "ALTER INDEX {} RENAME TO {}",
            self.index_name(from),
            quote_ident(to)
        ))
    }

    fn create_trigger(&self, trigger: &TriggerDefinition) -> Vec<Statement> {
        vec![
            Statement::new(trigger.definition(self.schema, self.table)),
            self.comment_on_trigger(&trigger.name, &trigger.content_hash),
        ]
    }

    fn comment_on_trigger(&self, name: &str, hash: &str) -> Statement {
        Statement::new(format!(
            "COMMENT ON TRIGGER {} ON {} IS {}",
            quote_ident(name),
            self.table_name(),
            quote_literal(hash)
        ))
    }

    fn drop_trigger(&self, name: &str) -> Statement {
        Statement::new(format!("DROP TRIGGER {} ON {}", quote_ident(name), self.table_name()))
    }

    fn rename_trigger(&self, from: &str, to: &str) -> Statement {
        Statement::new(format!(
            "ALTER TRIGGER {} ON {} RENAME TO {}",
            quote_ident(from),
            self.table_name(),
            quote_ident(to)
        ))
    }
}

fn drop_extension(name: &str) -> Statement {
    Statement::new(format!("DROP EXTENSION IF EXISTS {}", quote_ident(name)))
}

fn rename_table(schema: &str, from: &str, to: &str) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} RENAME TO {}",
        qualified(schema, from),
        quote_ident(to)
    ))
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

fn column_clause(column: &ColumnDefinition) -> String {
    let mut clause = format!("{} {}", quote_ident(&column.name), column.data_type);
    if let Some(identity) = column.identity.clause() {
        clause.push(' ');
        clause.push_str(identity);
    }
    if !column.is_nullable {
        clause.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        clause.push_str(&format!(" DEFAULT {}", default.sql));
    }
    clause
}

fn foreign_key_clause(fk: &ForeignKeyDefinition) -> String {
    let mut clause = format!(
        "ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        column_list(&fk.columns),
        qualified(&fk.target_schema, &fk.target_table),
        column_list(&fk.target_columns)
    );
    if fk.on_delete != ReferentialAction::NoAction {
        clause.push_str(&format!(" ON DELETE {}", fk.on_delete.sql()));
    }
    if fk.on_update != ReferentialAction::NoAction {
        clause.push_str(&format!(" ON UPDATE {}", fk.on_update.sql()));
    }
    clause
}

fn check_clause(check: &CheckConstraintDefinition) -> String {
    format!(
        "ADD CONSTRAINT {} CHECK ({})",
        quote_ident(&check.name),
        check.expression
    )
}
