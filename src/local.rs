//! Desired-schema provider: a declarative TOML schema file.
//!
//! ```toml
//! [[schemas]]
//! name = "public"
//! extensions = ["pgcrypto"]
//!
//! [[schemas.tables]]
//! name = "bookAuthors"
//! primaryKey = ["id"]
//! columns = [
//!   { name = "id", type = "bigserial" },
//!   { name = "authorId", type = "integer", nullable = false },
//! ]
//! foreignKeys = [
//!   { columns = ["authorId"], references = { table = "authors", columns = ["id"] }, onDelete = "cascade" },
//! ]
//! ```
//!
//! Identifiers are translated from camelCase to snake_case before anything
//! else sees them. SQL fragments (defaults, check expressions, predicates,
//! index expressions) are passed through untouched.

use crate::error::{PgdeltaError, Result};
use crate::naming::to_snake_case;
use crate::schema::{
    CheckConstraintDefinition, ColumnDefinition, EnumDefinition, ForeignKeyDefinition, Identity,
    IndexDefinition, ReferentialAction, SchemaSnapshot, TableDefinition, TriggerDefinition,
    TriggerEvent, TriggerLevel, TriggerTiming, UniqueConstraintDefinition,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    #[serde(default)]
    schemas: Vec<SchemaDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SchemaDecl {
    name: String,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    enums: Vec<EnumDecl>,
    #[serde(default)]
    tables: Vec<TableDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumDecl {
    name: String,
    values: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TableDecl {
    name: String,
    rename_from: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnDecl>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKeyDecl>,
    #[serde(default)]
    unique: Vec<UniqueDecl>,
    #[serde(default)]
    checks: Vec<CheckDecl>,
    #[serde(default)]
    indexes: Vec<IndexDecl>,
    #[serde(default)]
    triggers: Vec<TriggerDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ColumnDecl {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default = "default_true")]
    nullable: bool,
    default: Option<String>,
    identity: Option<Identity>,
    rename_from: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ForeignKeyDecl {
    name: Option<String>,
    columns: Vec<String>,
    references: ReferenceDecl,
    on_delete: Option<String>,
    on_update: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferenceDecl {
    schema: Option<String>,
    table: String,
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UniqueDecl {
    name: Option<String>,
    columns: Vec<String>,
    #[serde(default = "default_true")]
    nulls_distinct: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckDecl {
    name: Option<String>,
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexDecl {
    name: Option<String>,
    columns: Vec<String>,
    #[serde(default)]
    unique: bool,
    method: Option<String>,
    #[serde(rename = "where")]
    predicate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TriggerDecl {
    name: Option<String>,
    timing: TriggerTiming,
    events: Vec<TriggerEvent>,
    #[serde(default = "default_level")]
    level: TriggerLevel,
    when: Option<String>,
    function: String,
}

fn default_level() -> TriggerLevel {
    TriggerLevel::Row
}

/// Read and translate a schema file.
pub fn load_schema_file(path: &Path) -> Result<Vec<SchemaSnapshot>> {
    let content = fs::read_to_string(path).map_err(|e| PgdeltaError::FileRead {
        path: path.to_path_buf(),
        message: "cannot read schema file".into(),
        source: e,
    })?;
    parse_schema_file(&content, path)
}

/// Translate schema-file text; `path` is only used in error messages.
pub fn parse_schema_file(content: &str, path: &Path) -> Result<Vec<SchemaSnapshot>> {
    let file: SchemaFile = toml::from_str(content).map_err(|e| schema_error(path, e.to_string()))?;

    let mut snapshots = Vec::with_capacity(file.schemas.len());
    for decl in file.schemas {
        let snapshot = build_schema(decl, path)?;
        snapshot.validate()?;
        debug!(
            schema = %snapshot.schema_name,
            tables = snapshot.tables.len(),
            enums = snapshot.enums.len(),
            "loaded desired schema"
        );
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

fn schema_error(path: &Path, message: impl Into<String>) -> PgdeltaError {
    PgdeltaError::SchemaFile {
        path: PathBuf::from(path),
        message: message.into(),
    }
}

fn build_schema(decl: SchemaDecl, path: &Path) -> Result<SchemaSnapshot> {
    let schema_name = to_snake_case(&decl.name);
    let mut snapshot = SchemaSnapshot::new(&schema_name);

    for extension in decl.extensions {
        snapshot = snapshot.with_extension(extension);
    }

    for enum_decl in decl.enums {
        let name = to_snake_case(&enum_decl.name);
        if snapshot.enums.contains_key(&name) {
            return Err(PgdeltaError::DuplicateObject {
                kind: "enum",
                name,
                owner: schema_name.clone(),
            });
        }
        let values: Vec<&str> = enum_decl.values.iter().map(String::as_str).collect();
        snapshot = snapshot.with_enum(EnumDefinition::new(name, &values));
    }

    for table_decl in decl.tables {
        let table = build_table(&schema_name, table_decl, path)?;
        if snapshot.tables.contains_key(&table.name) {
            return Err(PgdeltaError::DuplicateObject {
                kind: "table",
                name: table.name,
                owner: schema_name.clone(),
            });
        }
        snapshot = snapshot.with_table(table);
    }

    Ok(snapshot)
}

fn snake_all(names: &[String]) -> Vec<String> {
    names.iter().map(|n| to_snake_case(n)).collect()
}

fn build_table(schema: &str, decl: TableDecl, path: &Path) -> Result<TableDefinition> {
    let name = to_snake_case(&decl.name);
    let owner = format!("{}.{}", schema, name);
    let mut table = TableDefinition::new(&name);

    for column_decl in decl.columns {
        let column = build_column(column_decl);
        if table.columns.contains_key(&column.name) {
            return Err(PgdeltaError::DuplicateObject {
                kind: "column",
                name: column.name,
                owner,
            });
        }
        table = table.with_column(column);
    }

    if !decl.primary_key.is_empty() {
        let columns = snake_all(&decl.primary_key);
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        table = table.with_primary_key(&columns);
    }

    for fk in decl.foreign_keys {
        let columns = snake_all(&fk.columns);
        let target_columns = snake_all(&fk.references.columns);
        if columns.len() != target_columns.len() || columns.is_empty() {
            return Err(schema_error(
                path,
                format!("foreign key on {} must pair each column with one referenced column", owner),
            ));
        }
        let target_schema = fk
            .references
            .schema
            .as_deref()
            .map_or_else(|| schema.to_string(), to_snake_case);
        let mut definition = ForeignKeyDefinition::new(
            &name,
            columns,
            target_schema,
            to_snake_case(&fk.references.table),
            target_columns,
        )
        .on_delete(parse_action(fk.on_delete.as_deref(), path)?)
        .on_update(parse_action(fk.on_update.as_deref(), path)?);
        if let Some(explicit) = fk.name {
            definition.name = explicit;
        }
        table = table.with_foreign_key(definition);
    }

    for unique in decl.unique {
        let mut definition = UniqueConstraintDefinition::new(&name, snake_all(&unique.columns));
        if !unique.nulls_distinct {
            definition = definition.nulls_not_distinct();
        }
        if let Some(explicit) = unique.name {
            definition.name = explicit;
        }
        table = table.with_unique(definition);
    }

    for check in decl.checks {
        let mut definition = CheckConstraintDefinition::new(&name, check.expression);
        if let Some(explicit) = check.name {
            definition = definition.named(explicit);
        }
        table = table.with_check(definition);
    }

    for index in decl.indexes {
        let columns = index.columns.iter().map(|c| index_element(c)).collect();
        table = table.with_index(IndexDefinition::build(
            &name,
            index.name,
            index.unique,
            index.method.as_deref().unwrap_or("btree"),
            columns,
            index.predicate,
        ));
    }

    for trigger in decl.triggers {
        table = table.with_trigger(TriggerDefinition::build(
            &name,
            trigger.name,
            trigger.timing,
            trigger.events,
            trigger.level,
            trigger.when,
            trigger.function,
        ));
    }

    if let Some(previous) = decl.rename_from {
        table = table.renamed_from(to_snake_case(&previous));
    }

    Ok(table)
}

fn build_column(decl: ColumnDecl) -> ColumnDefinition {
    let (data_type, serial) = normalize_type(&decl.data_type);
    let mut column = ColumnDefinition::new(to_snake_case(&decl.name), data_type);
    if !decl.nullable {
        column = column.not_null();
    }
    if let Some(default) = decl.default {
        column = column.with_default(default);
    }
    match (decl.identity, serial) {
        (Some(identity), _) => column = column.with_identity(identity),
        (None, true) => column = column.with_identity(Identity::ByDefault),
        (None, false) => {}
    }
    if let Some(previous) = decl.rename_from {
        column = column.renamed_from(to_snake_case(&previous));
    }
    column
}

/// Translate a bare column name; expressions and `col DESC` stay as written.
fn index_element(element: &str) -> String {
    let trimmed = element.trim();
    if trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return to_snake_case(trimmed);
    }
    match trimmed.split_once(' ') {
        Some((column, order))
            if column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && matches!(order.trim().to_uppercase().as_str(), "ASC" | "DESC") =>
        {
            format!("{} {}", to_snake_case(column), order.trim().to_uppercase())
        }
        _ => trimmed.to_string(),
    }
}

fn parse_action(value: Option<&str>, path: &Path) -> Result<ReferentialAction> {
    match value {
        None => Ok(ReferentialAction::NoAction),
        Some(v) => ReferentialAction::parse(v)
            .ok_or_else(|| schema_error(path, format!("unknown referential action '{}'", v))),
    }
}

/// Spell a type the way `format_type` reports it.
///
/// Returns the canonical type and whether it was a `serial` shorthand, which
/// is declared as an identity column instead of an owned sequence.
pub fn normalize_type(raw: &str) -> (String, bool) {
    let lowered = raw.trim().to_lowercase();
    let mut base = lowered.as_str();
    let mut array = String::new();
    while let Some(stripped) = base.strip_suffix("[]") {
        array.push_str("[]");
        base = stripped.trim_end();
    }

    let (name, args) = match base.split_once('(') {
        Some((name, rest)) => (name.trim(), format!("({}", rest.trim())),
        None => (base, String::new()),
    };
    // `timestamp(3) with time zone` keeps its suffix after the modifier.
    let (args, suffix) = match args.split_once(')') {
        Some((inner, tail)) if !args.is_empty() => (format!("{})", inner), tail.trim().to_string()),
        _ => (args.clone(), String::new()),
    };
    let zoned = |with: &str, without: &str| {
        if suffix.is_empty() {
            format!("{}{} {}", with, args, without)
        } else {
            format!("{}{} {}", with, args, suffix)
        }
    };

    let (canonical, serial) = match name {
        "int" | "int4" | "integer" => ("integer".to_string(), false),
        "int2" | "smallint" => ("smallint".to_string(), false),
        "int8" | "bigint" => ("bigint".to_string(), false),
        "serial" | "serial4" => ("integer".to_string(), true),
        "smallserial" | "serial2" => ("smallint".to_string(), true),
        "bigserial" | "serial8" => ("bigint".to_string(), true),
        "bool" | "boolean" => ("boolean".to_string(), false),
        "float4" | "real" => ("real".to_string(), false),
        "float8" | "double precision" => ("double precision".to_string(), false),
        "decimal" | "numeric" => (format!("numeric{}", args), false),
        "varchar" | "character varying" => (format!("character varying{}", args), false),
        "char" | "character" | "bpchar" => (format!("character{}", args), false),
        "timestamptz" => (zoned("timestamp", "with time zone"), false),
        "timetz" => (zoned("time", "with time zone"), false),
        "timestamp" => (zoned("timestamp", "without time zone"), false),
        "time" => (zoned("time", "without time zone"), false),
        _ => (format!("{}{}{}", name, args, if suffix.is_empty() { String::new() } else { format!(" {}", suffix) }), false),
    };
    (format!("{}{}", canonical, array), serial)
}
