//! Live snapshot of one schema, read from the system catalogs.
//!
//! Content hashes are not recomputed from the catalog's SQL text: they are
//! read back from the `COMMENT ON` values written when each object was
//! created. Objects without such a comment get an empty hash and therefore
//! never compare equal to a desired definition.

use crate::error::Result;
use crate::schema::{
    CheckConstraintDefinition, ColumnDefinition, DefaultValue, EnumDefinition, ForeignKeyDefinition,
    Identity, IndexDefinition, PrimaryKeyDefinition, ReferentialAction, SchemaSnapshot,
    TableDefinition, TriggerDefinition, TriggerEvent, TriggerLevel, TriggerTiming,
    UniqueConstraintDefinition,
};
use std::collections::BTreeMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};
use tracing::debug;

const SCHEMA_EXISTS: &str = "SELECT 1 FROM pg_namespace WHERE nspname = $1";

const EXTENSIONS: &str = r#"
SELECT e.extname::text
FROM pg_extension e
JOIN pg_namespace n ON n.oid = e.extnamespace
WHERE n.nspname = $1
ORDER BY e.extname
"#;

const ENUMS: &str = r#"
SELECT t.typname::text AS name,
       array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS labels
FROM pg_type t
JOIN pg_namespace n ON n.oid = t.typnamespace
JOIN pg_enum e ON e.enumtypid = t.oid
WHERE n.nspname = $1
GROUP BY t.typname
ORDER BY t.typname
"#;

const COLUMNS: &str = r#"
SELECT c.relname::text AS table_name,
       a.attname::text AS column_name,
       format_type(a.atttypid, a.atttypmod) AS data_type,
       a.attnotnull AS not_null,
       a.attidentity::text AS identity,
       pg_get_expr(d.adbin, d.adrelid) AS default_expr,
       col_description(c.oid, a.attnum) AS comment
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
LEFT JOIN pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND NOT c.relispartition
ORDER BY c.relname, a.attnum
"#;

const CONSTRAINTS: &str = r#"
SELECT c.relname::text AS table_name,
       con.conname::text AS name,
       con.contype::text AS kind,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
             ORDER BY k.ord) AS columns,
       fn.nspname::text AS target_schema,
       fc.relname::text AS target_table,
       ARRAY(SELECT a.attname::text
             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
             ORDER BY k.ord) AS target_columns,
       con.confdeltype::text AS on_delete,
       con.confupdtype::text AS on_update,
       pg_get_constraintdef(con.oid) AS definition,
       obj_description(con.oid, 'pg_constraint') AS comment
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_class fc ON fc.oid = con.confrelid
LEFT JOIN pg_namespace fn ON fn.oid = fc.relnamespace
WHERE n.nspname = $1 AND con.contype IN ('p', 'u', 'f', 'c')
ORDER BY c.relname, con.conname
"#;

// Indexes that back a constraint are owned by the constraint.
const INDEXES: &str = r#"
SELECT c.relname::text AS table_name,
       i.relname::text AS index_name,
       ix.indisunique AS is_unique,
       am.amname::text AS method,
       ARRAY(SELECT pg_get_indexdef(ix.indexrelid, k, true)
             FROM generate_series(1, ix.indnkeyatts::int) AS k
             ORDER BY k) AS columns,
       pg_get_expr(ix.indpred, ix.indrelid, true) AS predicate,
       obj_description(i.oid, 'pg_class') AS comment
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class c ON c.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_am am ON am.oid = i.relam
WHERE n.nspname = $1
  AND NOT EXISTS (
      SELECT 1 FROM pg_constraint con
      WHERE con.conindid = ix.indexrelid
        AND con.conrelid = ix.indrelid
        AND con.contype IN ('p', 'u', 'x'))
ORDER BY c.relname, i.relname
"#;

const TRIGGERS: &str = r#"
SELECT c.relname::text AS table_name,
       t.tgname::text AS name,
       t.tgtype::int4 AS tgtype,
       pg_get_triggerdef(t.oid) AS definition,
       pn.nspname::text AS function_schema,
       p.proname::text AS function_name,
       obj_description(t.oid, 'pg_trigger') AS comment
FROM pg_trigger t
JOIN pg_class c ON c.oid = t.tgrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_proc p ON p.oid = t.tgfoid
JOIN pg_namespace pn ON pn.oid = p.pronamespace
WHERE n.nspname = $1 AND NOT t.tgisinternal
ORDER BY c.relname, t.tgname
"#;

// pg_trigger.tgtype bits
const TRIGGER_ROW: i32 = 1 << 0;
const TRIGGER_BEFORE: i32 = 1 << 1;
const TRIGGER_INSERT: i32 = 1 << 2;
const TRIGGER_DELETE: i32 = 1 << 3;
const TRIGGER_UPDATE: i32 = 1 << 4;
const TRIGGER_TRUNCATE: i32 = 1 << 5;
const TRIGGER_INSTEAD: i32 = 1 << 6;

/// Read `schema` from the live database; `None` when the schema does not exist.
pub async fn introspect_schema(client: &Client, schema: &str) -> Result<Option<SchemaSnapshot>> {
    if client.query_opt(SCHEMA_EXISTS, &[&schema]).await?.is_none() {
        debug!(schema, "schema does not exist");
        return Ok(None);
    }

    // Bound once so every joined query future can borrow it.
    let params: [&(dyn ToSql + Sync); 1] = [&schema];
    let (extensions, enums, columns, constraints, indexes, triggers) = futures_util::try_join!(
        client.query(EXTENSIONS, &params),
        client.query(ENUMS, &params),
        client.query(COLUMNS, &params),
        client.query(CONSTRAINTS, &params),
        client.query(INDEXES, &params),
        client.query(TRIGGERS, &params),
    )?;

    let mut snapshot = SchemaSnapshot::new(schema);
    for row in &extensions {
        snapshot = snapshot.with_extension(row.get::<_, String>(0));
    }
    for row in &enums {
        let labels: Vec<String> = row.get("labels");
        snapshot.enums.insert(
            row.get("name"),
            EnumDefinition {
                name: row.get("name"),
                values: labels,
            },
        );
    }

    let mut tables = read_columns(schema, &columns);
    for row in &constraints {
        if let Some(table) = tables.get_mut(row.get::<_, &str>("table_name")) {
            add_constraint(table, row);
        }
    }
    for row in &indexes {
        if let Some(table) = tables.get_mut(row.get::<_, &str>("table_name")) {
            table.indexes.push(read_index(row));
        }
    }
    for row in &triggers {
        if let Some(table) = tables.get_mut(row.get::<_, &str>("table_name")) {
            table.triggers.push(read_trigger(schema, row));
        }
    }
    snapshot.tables = tables;

    debug!(
        schema,
        tables = snapshot.tables.len(),
        enums = snapshot.enums.len(),
        extensions = snapshot.extensions.len(),
        "introspected schema"
    );
    Ok(Some(snapshot))
}

/// Introspect several schemas, skipping the ones that do not exist.
pub async fn introspect_schemas(client: &Client, schemas: &[String]) -> Result<Vec<SchemaSnapshot>> {
    let mut snapshots = Vec::with_capacity(schemas.len());
    for schema in schemas {
        if let Some(snapshot) = introspect_schema(client, schema).await? {
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}

fn read_columns(schema: &str, rows: &[Row]) -> BTreeMap<String, TableDefinition> {
    let mut tables: BTreeMap<String, TableDefinition> = BTreeMap::new();
    for row in rows {
        let table_name: String = row.get("table_name");
        let table = tables
            .entry(table_name.clone())
            .or_insert_with(|| TableDefinition::new(table_name));

        let Some(name) = row.get::<_, Option<String>>("column_name") else {
            continue;
        };
        let data_type: String = row.get("data_type");
        let default_value = row
            .get::<_, Option<String>>("default_expr")
            .map(|sql| DefaultValue {
                sql,
                content_hash: stored_hash(row.get("comment")),
            });

        table.columns.insert(
            name.clone(),
            ColumnDefinition {
                name,
                data_type: unqualify_type(schema, &data_type),
                is_nullable: !row.get::<_, bool>("not_null"),
                default_value,
                identity: Identity::from_catalog(row.get::<_, Option<&str>>("identity").unwrap_or("")),
                rename_from: None,
            },
        );
    }
    tables
}

fn add_constraint(table: &mut TableDefinition, row: &Row) {
    let name: String = row.get("name");
    let columns: Vec<String> = row.get("columns");
    let definition: String = row.get("definition");

    match row.get::<_, &str>("kind") {
        "p" => table.primary_key = Some(PrimaryKeyDefinition { name, columns }),
        "u" => table.unique_constraints.push(UniqueConstraintDefinition {
            name,
            columns,
            nulls_distinct: !definition.contains("NULLS NOT DISTINCT"),
        }),
        "f" => table.foreign_keys.push(ForeignKeyDefinition {
            name,
            columns,
            target_schema: row.get::<_, Option<String>>("target_schema").unwrap_or_default(),
            target_table: row.get::<_, Option<String>>("target_table").unwrap_or_default(),
            target_columns: row.get("target_columns"),
            on_delete: ReferentialAction::from_catalog(row.get::<_, Option<&str>>("on_delete").unwrap_or("a")),
            on_update: ReferentialAction::from_catalog(row.get::<_, Option<&str>>("on_update").unwrap_or("a")),
        }),
        "c" => table.check_constraints.push(CheckConstraintDefinition {
            name,
            expression: check_expression(&definition),
            content_hash: stored_hash(row.get("comment")),
        }),
        _ => {}
    }
}

fn read_index(row: &Row) -> IndexDefinition {
    IndexDefinition {
        name: row.get("index_name"),
        unique: row.get("is_unique"),
        method: row.get("method"),
        columns: row.get("columns"),
        predicate: row.get("predicate"),
        content_hash: stored_hash(row.get("comment")),
    }
}

fn read_trigger(schema: &str, row: &Row) -> TriggerDefinition {
    let tgtype: i32 = row.get("tgtype");
    let function_schema: String = row.get("function_schema");
    let function_name: String = row.get("function_name");
    let definition: String = row.get("definition");

    let (timing, events, level) = decode_trigger_type(tgtype);
    TriggerDefinition {
        name: row.get("name"),
        timing,
        events,
        level,
        condition: trigger_condition(&definition),
        function: if function_schema == schema || function_schema == "public" {
            function_name
        } else {
            format!("{}.{}", function_schema, function_name)
        },
        content_hash: stored_hash(row.get("comment")),
    }
}

fn decode_trigger_type(tgtype: i32) -> (TriggerTiming, Vec<TriggerEvent>, TriggerLevel) {
    let timing = if tgtype & TRIGGER_INSTEAD != 0 {
        TriggerTiming::InsteadOf
    } else if tgtype & TRIGGER_BEFORE != 0 {
        TriggerTiming::Before
    } else {
        TriggerTiming::After
    };
    let events = [
        (TRIGGER_INSERT, TriggerEvent::Insert),
        (TRIGGER_UPDATE, TriggerEvent::Update),
        (TRIGGER_DELETE, TriggerEvent::Delete),
        (TRIGGER_TRUNCATE, TriggerEvent::Truncate),
    ]
    .into_iter()
    .filter(|(bit, _)| tgtype & bit != 0)
    .map(|(_, event)| event)
    .collect();
    let level = if tgtype & TRIGGER_ROW != 0 {
        TriggerLevel::Row
    } else {
        TriggerLevel::Statement
    };
    (timing, events, level)
}

/// A stored content hash is exactly 8 lowercase hex digits.
fn stored_hash(comment: Option<String>) -> String {
    match comment {
        Some(c) if c.len() == 8 && c.chars().all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch)) => c,
        _ => String::new(),
    }
}

/// `CHECK ((expr)) NOT VALID` -> `(expr)`
fn check_expression(definition: &str) -> String {
    let body = definition.trim();
    let body = body.strip_suffix("NOT VALID").unwrap_or(body).trim_end();
    let body = body.strip_prefix("CHECK").unwrap_or(body).trim();
    match body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        Some(inner) => inner.to_string(),
        None => body.to_string(),
    }
}

fn trigger_condition(definition: &str) -> Option<String> {
    let start = definition.find(" WHEN (")? + " WHEN (".len();
    let end = definition.rfind(") EXECUTE ")?;
    (end > start).then(|| definition[start..end].to_string())
}

/// `format_type` qualifies types outside the search path; types of the
/// introspected schema are declared unqualified.
fn unqualify_type(schema: &str, data_type: &str) -> String {
    let quoted = format!("\"{}\".", schema);
    let plain = format!("{}.", schema);
    data_type
        .strip_prefix(&quoted)
        .or_else(|| data_type.strip_prefix(&plain))
        .unwrap_or(data_type)
        .to_string()
}
