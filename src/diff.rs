//! Schema diffing.
//!
//! [`diff_snapshots`] walks the desired and live snapshot of one schema object
//! kind by object kind and emits one typed [`Diff`] per difference. The result
//! is unordered; [`crate::priority::schedule`] decides execution order.
//!
//! Objects are matched by what they are rather than what they are called:
//!
//! - foreign keys by `(target, column pairs)`
//! - unique constraints by their sorted column set
//! - check constraints, indexes and triggers by content hash
//!
//! A match whose name differs becomes a rename; anything left unmatched on
//! either side becomes a drop or a create. Only column type changes and
//! nullability toggles are altered in place.

use crate::error::{PgdeltaError, Result};
use crate::rename::AppliedRenames;
use crate::schema::{
    CheckConstraintDefinition, ColumnDefinition, DefaultValue, EnumDefinition,
    ForeignKeyDefinition, Identity, IndexDefinition, PrimaryKeyDefinition, SchemaSnapshot,
    TableDefinition, TriggerDefinition, UniqueConstraintDefinition,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

/// Where an added enum value goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EnumPosition {
    Before(String),
    After(String),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumValueAddition {
    pub value: String,
    pub position: EnumPosition,
}

/// Content-hash comment rewritten together with a rename, when a column
/// rename changed the text the stored hash was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rehash {
    pub from: String,
    pub to: String,
}

/// Payload of a diff, one variant per diff type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiffKind {
    CreateSchema,
    DropSchema,
    CreateExtension { name: String },
    DropExtension { name: String },
    CreateEnum { definition: EnumDefinition },
    DropEnum { definition: EnumDefinition },
    ChangeEnum { name: String, added: Vec<EnumValueAddition> },

    CreateTable { definition: TableDefinition },
    DropTable { definition: TableDefinition },
    ChangeTable { from: String, to: String },

    CreateColumn { column: ColumnDefinition },
    DropColumn { column: ColumnDefinition },
    ChangeColumnName { from: String, to: String },
    ChangeColumn { column: String, from_type: String, to_type: String },
    ChangeColumnIdentity {
        column: String,
        from: Identity,
        to: Identity,
        /// The column is nullable today and must become NOT NULL first.
        set_not_null: bool,
    },
    SetColumnDefault { column: String, value: DefaultValue, previous: Option<DefaultValue> },
    DropColumnDefault { column: String, previous: DefaultValue },
    SetColumnNotNull { column: String },
    DropColumnNotNull { column: String },

    CreatePrimaryKey {
        primary_key: PrimaryKeyDefinition,
        /// Key columns that are nullable in the database today.
        nullable_columns: Vec<String>,
        on_existing_table: bool,
    },
    DropPrimaryKey { primary_key: PrimaryKeyDefinition },
    CreateUniqueConstraint { unique: UniqueConstraintDefinition, on_existing_table: bool },
    DropUniqueConstraint { unique: UniqueConstraintDefinition },
    CreateForeignKey { foreign_key: ForeignKeyDefinition },
    DropForeignKey { foreign_key: ForeignKeyDefinition },
    CreateCheckConstraint { check: CheckConstraintDefinition },
    DropCheckConstraint { check: CheckConstraintDefinition },
    RenameConstraint {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rehash: Option<Rehash>,
    },

    CreateIndex { index: IndexDefinition, on_existing_table: bool },
    DropIndex { index: IndexDefinition, on_existing_table: bool },
    ChangeIndex {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rehash: Option<Rehash>,
    },

    CreateTrigger { trigger: TriggerDefinition },
    DropTrigger { trigger: TriggerDefinition },
    RenameTrigger {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rehash: Option<Rehash>,
    },
}

/// Discriminant of [`DiffKind`], used for display and priority lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffType {
    CreateSchema,
    DropSchema,
    CreateExtension,
    DropExtension,
    CreateEnum,
    DropEnum,
    ChangeEnum,
    CreateTable,
    DropTable,
    ChangeTable,
    CreateColumn,
    DropColumn,
    ChangeColumnName,
    ChangeColumn,
    ChangeColumnIdentity,
    SetColumnDefault,
    DropColumnDefault,
    SetColumnNotNull,
    DropColumnNotNull,
    CreatePrimaryKey,
    DropPrimaryKey,
    CreateUniqueConstraint,
    DropUniqueConstraint,
    CreateForeignKey,
    DropForeignKey,
    CreateCheckConstraint,
    DropCheckConstraint,
    RenameConstraint,
    CreateIndex,
    DropIndex,
    ChangeIndex,
    CreateTrigger,
    DropTrigger,
    RenameTrigger,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::CreateSchema => "createSchema",
            DiffType::DropSchema => "dropSchema",
            DiffType::CreateExtension => "createExtension",
            DiffType::DropExtension => "dropExtension",
            DiffType::CreateEnum => "createEnum",
            DiffType::DropEnum => "dropEnum",
            DiffType::ChangeEnum => "changeEnum",
            DiffType::CreateTable => "createTable",
            DiffType::DropTable => "dropTable",
            DiffType::ChangeTable => "changeTable",
            DiffType::CreateColumn => "createColumn",
            DiffType::DropColumn => "dropColumn",
            DiffType::ChangeColumnName => "changeColumnName",
            DiffType::ChangeColumn => "changeColumn",
            DiffType::ChangeColumnIdentity => "changeColumnIdentity",
            DiffType::SetColumnDefault => "setColumnDefault",
            DiffType::DropColumnDefault => "dropColumnDefault",
            DiffType::SetColumnNotNull => "setColumnNotNull",
            DiffType::DropColumnNotNull => "dropColumnNotNull",
            DiffType::CreatePrimaryKey => "createPrimaryKey",
            DiffType::DropPrimaryKey => "dropPrimaryKey",
            DiffType::CreateUniqueConstraint => "createUniqueConstraint",
            DiffType::DropUniqueConstraint => "dropUniqueConstraint",
            DiffType::CreateForeignKey => "createForeignKey",
            DiffType::DropForeignKey => "dropForeignKey",
            DiffType::CreateCheckConstraint => "createCheckConstraint",
            DiffType::DropCheckConstraint => "dropCheckConstraint",
            DiffType::RenameConstraint => "renameConstraint",
            DiffType::CreateIndex => "createIndex",
            DiffType::DropIndex => "dropIndex",
            DiffType::ChangeIndex => "changeIndex",
            DiffType::CreateTrigger => "createTrigger",
            DiffType::DropTrigger => "dropTrigger",
            DiffType::RenameTrigger => "renameTrigger",
        }
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DiffKind {
    pub fn diff_type(&self) -> DiffType {
        match self {
            DiffKind::CreateSchema => DiffType::CreateSchema,
            DiffKind::DropSchema => DiffType::DropSchema,
            DiffKind::CreateExtension { .. } => DiffType::CreateExtension,
            DiffKind::DropExtension { .. } => DiffType::DropExtension,
            DiffKind::CreateEnum { .. } => DiffType::CreateEnum,
            DiffKind::DropEnum { .. } => DiffType::DropEnum,
            DiffKind::ChangeEnum { .. } => DiffType::ChangeEnum,
            DiffKind::CreateTable { .. } => DiffType::CreateTable,
            DiffKind::DropTable { .. } => DiffType::DropTable,
            DiffKind::ChangeTable { .. } => DiffType::ChangeTable,
            DiffKind::CreateColumn { .. } => DiffType::CreateColumn,
            DiffKind::DropColumn { .. } => DiffType::DropColumn,
            DiffKind::ChangeColumnName { .. } => DiffType::ChangeColumnName,
            DiffKind::ChangeColumn { .. } => DiffType::ChangeColumn,
            DiffKind::ChangeColumnIdentity { .. } => DiffType::ChangeColumnIdentity,
            DiffKind::SetColumnDefault { .. } => DiffType::SetColumnDefault,
            DiffKind::DropColumnDefault { .. } => DiffType::DropColumnDefault,
            DiffKind::SetColumnNotNull { .. } => DiffType::SetColumnNotNull,
            DiffKind::DropColumnNotNull { .. } => DiffType::DropColumnNotNull,
            DiffKind::CreatePrimaryKey { .. } => DiffType::CreatePrimaryKey,
            DiffKind::DropPrimaryKey { .. } => DiffType::DropPrimaryKey,
            DiffKind::CreateUniqueConstraint { .. } => DiffType::CreateUniqueConstraint,
            DiffKind::DropUniqueConstraint { .. } => DiffType::DropUniqueConstraint,
            DiffKind::CreateForeignKey { .. } => DiffType::CreateForeignKey,
            DiffKind::DropForeignKey { .. } => DiffType::DropForeignKey,
            DiffKind::CreateCheckConstraint { .. } => DiffType::CreateCheckConstraint,
            DiffKind::DropCheckConstraint { .. } => DiffType::DropCheckConstraint,
            DiffKind::RenameConstraint { .. } => DiffType::RenameConstraint,
            DiffKind::CreateIndex { .. } => DiffType::CreateIndex,
            DiffKind::DropIndex { .. } => DiffType::DropIndex,
            DiffKind::ChangeIndex { .. } => DiffType::ChangeIndex,
            DiffKind::CreateTrigger { .. } => DiffType::CreateTrigger,
            DiffKind::DropTrigger { .. } => DiffType::DropTrigger,
            DiffKind::RenameTrigger { .. } => DiffType::RenameTrigger,
        }
    }
}

/// One difference between the desired and the live schema.
///
/// `table` is the name the table has at the moment the diff executes: diffs
/// that run before a table rename use the old name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diff {
    pub schema: String,
    pub table: Option<String>,
    pub object_name: Option<String>,
    #[serde(flatten)]
    pub kind: DiffKind,
}

impl Diff {
    pub fn new(schema: &str, table: Option<&str>, object_name: Option<&str>, kind: DiffKind) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.map(str::to_string),
            object_name: object_name.map(str::to_string),
            kind,
        }
    }

    pub fn diff_type(&self) -> DiffType {
        self.kind.diff_type()
    }

    /// `schema.table.object`, skipping absent parts.
    pub fn label(&self) -> String {
        let mut label = self.schema.clone();
        for part in [&self.table, &self.object_name].into_iter().flatten() {
            label.push('.');
            label.push_str(part);
        }
        label
    }
}

/// Diff one schema. `None` on either side means the schema does not exist there.
pub fn diff_snapshots(
    local: Option<&SchemaSnapshot>,
    remote: Option<&SchemaSnapshot>,
    renames: &AppliedRenames,
) -> Result<Vec<Diff>> {
    let schema_created = local.is_some() && remote.is_none();
    let schema_dropped = local.is_none() && remote.is_some();
    let (schema, local, remote) = match (local, remote) {
        (None, None) => return Ok(Vec::new()),
        (Some(l), Some(r)) => (l.schema_name.clone(), l.clone(), r.clone()),
        (Some(l), None) => (l.schema_name.clone(), l.clone(), SchemaSnapshot::new(&l.schema_name)),
        (None, Some(r)) => (r.schema_name.clone(), SchemaSnapshot::new(&r.schema_name), r.clone()),
    };
    let mut diffs = Vec::new();

    if schema_created {
        diffs.push(Diff::new(&schema, None, None, DiffKind::CreateSchema));
    }

    diff_extensions(&schema, &local, &remote, &mut diffs);
    diff_enums(&schema, &local, &remote, &mut diffs)?;

    for pair in &renames.tables {
        diffs.push(Diff::new(
            &schema,
            Some(&pair.to),
            None,
            DiffKind::ChangeTable {
                from: pair.from.clone(),
                to: pair.to.clone(),
            },
        ));
    }
    for (table, pair) in &renames.columns {
        diffs.push(Diff::new(
            &schema,
            Some(table),
            Some(&pair.to),
            DiffKind::ChangeColumnName {
                from: pair.from.clone(),
                to: pair.to.clone(),
            },
        ));
    }

    for (name, local_table) in &local.tables {
        match remote.tables.get(name) {
            Some(remote_table) => diff_table(&schema, local_table, remote_table, renames, &mut diffs),
            None => create_table(&schema, local_table, &mut diffs),
        }
    }
    for (name, remote_table) in &remote.tables {
        if !local.tables.contains_key(name) {
            drop_table(&schema, remote_table, &mut diffs);
        }
    }

    if schema_dropped {
        diffs.push(Diff::new(&schema, None, None, DiffKind::DropSchema));
    }

    debug!(schema = %schema, count = diffs.len(), "computed schema diff");
    Ok(diffs)
}

fn diff_extensions(schema: &str, local: &SchemaSnapshot, remote: &SchemaSnapshot, diffs: &mut Vec<Diff>) {
    for name in local.extensions.difference(&remote.extensions) {
        diffs.push(Diff::new(schema, None, Some(name), DiffKind::CreateExtension { name: name.clone() }));
    }
    for name in remote.extensions.difference(&local.extensions) {
        diffs.push(Diff::new(schema, None, Some(name), DiffKind::DropExtension { name: name.clone() }));
    }
}

fn diff_enums(schema: &str, local: &SchemaSnapshot, remote: &SchemaSnapshot, diffs: &mut Vec<Diff>) -> Result<()> {
    for (name, definition) in &local.enums {
        match remote.enums.get(name) {
            None => diffs.push(Diff::new(
                schema,
                None,
                Some(name),
                DiffKind::CreateEnum { definition: definition.clone() },
            )),
            Some(existing) => {
                let added = enum_additions(schema, existing, definition)?;
                if !added.is_empty() {
                    diffs.push(Diff::new(
                        schema,
                        None,
                        Some(name),
                        DiffKind::ChangeEnum { name: name.clone(), added },
                    ));
                }
            }
        }
    }
    for (name, definition) in &remote.enums {
        if !local.enums.contains_key(name) {
            diffs.push(Diff::new(
                schema,
                None,
                Some(name),
                DiffKind::DropEnum { definition: definition.clone() },
            ));
        }
    }
    Ok(())
}

/// Values in `desired` that are missing from `existing`, with anchors.
///
/// `existing` must survive as an ordered subsequence of `desired`; anything
/// else would need a value removal or reorder, which Postgres cannot do.
pub fn enum_additions(
    schema: &str,
    existing: &EnumDefinition,
    desired: &EnumDefinition,
) -> Result<Vec<EnumValueAddition>> {
    let unsupported = |message: String| PgdeltaError::UnsupportedEnumChange {
        schema: schema.to_string(),
        name: desired.name.clone(),
        message,
    };

    if let Some(removed) = existing.values.iter().find(|v| !desired.values.contains(v)) {
        return Err(unsupported(format!("value '{}' would be removed", removed)));
    }
    let kept: Vec<&String> = desired
        .values
        .iter()
        .filter(|v| existing.values.contains(v))
        .collect();
    if kept.iter().copied().ne(existing.values.iter()) {
        return Err(unsupported(format!(
            "values would be reordered from [{}] to [{}]",
            existing.values.join(", "),
            kept.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
        )));
    }

    let mut added = Vec::new();
    for (i, value) in desired.values.iter().enumerate() {
        if existing.values.contains(value) {
            continue;
        }
        let position = if i > 0 {
            EnumPosition::After(desired.values[i - 1].clone())
        } else if let Some(first) = existing.values.first() {
            EnumPosition::Before(first.clone())
        } else {
            EnumPosition::End
        };
        added.push(EnumValueAddition {
            value: value.clone(),
            position,
        });
    }
    Ok(added)
}

fn create_table(schema: &str, table: &TableDefinition, diffs: &mut Vec<Diff>) {
    let name = table.name.as_str();
    diffs.push(Diff::new(
        schema,
        Some(name),
        None,
        DiffKind::CreateTable { definition: table.clone() },
    ));
    if let Some(pk) = &table.primary_key {
        diffs.push(Diff::new(
            schema,
            Some(name),
            Some(&pk.name),
            DiffKind::CreatePrimaryKey {
                primary_key: pk.clone(),
                nullable_columns: Vec::new(),
                on_existing_table: false,
            },
        ));
    }
    for unique in &table.unique_constraints {
        diffs.push(Diff::new(
            schema,
            Some(name),
            Some(&unique.name),
            DiffKind::CreateUniqueConstraint { unique: unique.clone(), on_existing_table: false },
        ));
    }
    for fk in &table.foreign_keys {
        diffs.push(create_foreign_key(schema, name, fk));
    }
    for check in &table.check_constraints {
        diffs.push(Diff::new(
            schema,
            Some(name),
            Some(&check.name),
            DiffKind::CreateCheckConstraint { check: check.clone() },
        ));
    }
    for index in &table.indexes {
        diffs.push(create_index(schema, name, index, false));
    }
    for trigger in &table.triggers {
        diffs.push(Diff::new(
            schema,
            Some(name),
            Some(&trigger.name),
            DiffKind::CreateTrigger { trigger: trigger.clone() },
        ));
    }
}

/// Drop a table after its dependents, so every drop has an exact inverse.
fn drop_table(schema: &str, table: &TableDefinition, diffs: &mut Vec<Diff>) {
    let name = table.name.as_str();
    for trigger in &table.triggers {
        diffs.push(drop_trigger(schema, name, trigger));
    }
    for index in &table.indexes {
        diffs.push(drop_index(schema, name, index, false));
    }
    for fk in &table.foreign_keys {
        diffs.push(drop_foreign_key(schema, name, fk));
    }
    for unique in &table.unique_constraints {
        diffs.push(drop_unique(schema, name, unique));
    }
    for check in &table.check_constraints {
        diffs.push(drop_check(schema, name, check));
    }
    if let Some(pk) = &table.primary_key {
        diffs.push(Diff::new(
            schema,
            Some(name),
            Some(&pk.name),
            DiffKind::DropPrimaryKey { primary_key: pk.clone() },
        ));
    }
    diffs.push(Diff::new(
        schema,
        Some(name),
        None,
        DiffKind::DropTable { definition: table.clone() },
    ));
}

fn create_foreign_key(schema: &str, table: &str, fk: &ForeignKeyDefinition) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&fk.name),
        DiffKind::CreateForeignKey { foreign_key: fk.clone() },
    )
}

fn drop_foreign_key(schema: &str, table: &str, fk: &ForeignKeyDefinition) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&fk.name),
        DiffKind::DropForeignKey { foreign_key: fk.clone() },
    )
}

fn drop_unique(schema: &str, table: &str, unique: &UniqueConstraintDefinition) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&unique.name),
        DiffKind::DropUniqueConstraint { unique: unique.clone() },
    )
}

fn drop_check(schema: &str, table: &str, check: &CheckConstraintDefinition) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&check.name),
        DiffKind::DropCheckConstraint { check: check.clone() },
    )
}

fn create_index(schema: &str, table: &str, index: &IndexDefinition, on_existing_table: bool) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&index.name),
        DiffKind::CreateIndex { index: index.clone(), on_existing_table },
    )
}

fn drop_index(schema: &str, table: &str, index: &IndexDefinition, on_existing_table: bool) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&index.name),
        DiffKind::DropIndex { index: index.clone(), on_existing_table },
    )
}

fn drop_trigger(schema: &str, table: &str, trigger: &TriggerDefinition) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(&trigger.name),
        DiffKind::DropTrigger { trigger: trigger.clone() },
    )
}

fn rename_constraint(schema: &str, table: &str, from: &str, to: &str, rehash: Option<Rehash>) -> Diff {
    Diff::new(
        schema,
        Some(table),
        Some(to),
        DiffKind::RenameConstraint { from: from.to_string(), to: to.to_string(), rehash },
    )
}

fn carried_rehash(renames: &AppliedRenames, table: &str, current: &str) -> Option<Rehash> {
    renames.stored_hash(table, current).map(|stored| Rehash {
        from: stored.to_string(),
        to: current.to_string(),
    })
}

/// Pair up objects with equal keys, preferring pairs that also share a name.
///
/// Returns `(matched, local only, remote only)`.
fn match_objects<'a, T, K, FK, FN>(
    local: &'a [T],
    remote: &'a [T],
    key: FK,
    name: FN,
) -> (Vec<(&'a T, &'a T)>, Vec<&'a T>, Vec<&'a T>)
where
    K: PartialEq,
    FK: Fn(&T) -> K,
    FN: Fn(&T) -> &str,
{
    let mut used = vec![false; remote.len()];
    let mut matched = Vec::new();
    let mut local_only = Vec::new();

    for l in local {
        let k = key(l);
        let candidates: Vec<usize> = (0..remote.len())
            .filter(|&i| !used[i] && key(&remote[i]) == k)
            .collect();
        let pick = candidates
            .iter()
            .copied()
            .find(|&i| name(&remote[i]) == name(l))
            .or_else(|| candidates.first().copied());
        match pick {
            Some(i) => {
                used[i] = true;
                matched.push((l, &remote[i]));
            }
            None => local_only.push(l),
        }
    }

    let remote_only = remote
        .iter()
        .zip(used)
        .filter(|(_, used)| !used)
        .map(|(r, _)| r)
        .collect();

    (matched, local_only, remote_only)
}

fn diff_table(
    schema: &str,
    local: &TableDefinition,
    remote: &TableDefinition,
    renames: &AppliedRenames,
    diffs: &mut Vec<Diff>,
) {
    let table = local.name.as_str();
    // Drops of constraints, indexes and triggers run before table renames.
    let old_table = renames.original_table(table);

    let pk_nullable = diff_primary_key(schema, local, remote, diffs);
    diff_columns(schema, local, remote, renames, &pk_nullable, diffs);

    let (matched, added, dropped) = match_objects(
        &local.foreign_keys,
        &remote.foreign_keys,
        ForeignKeyDefinition::shape,
        |fk| fk.name.as_str(),
    );
    for (l, r) in matched {
        if l.on_delete != r.on_delete || l.on_update != r.on_update {
            diffs.push(drop_foreign_key(schema, old_table, r));
            diffs.push(create_foreign_key(schema, table, l));
        } else if l.name != r.name {
            diffs.push(rename_constraint(schema, table, &r.name, &l.name, None));
        }
    }
    for fk in added {
        diffs.push(create_foreign_key(schema, table, fk));
    }
    for fk in dropped {
        diffs.push(drop_foreign_key(schema, old_table, fk));
    }

    let (matched, added, dropped) = match_objects(
        &local.unique_constraints,
        &remote.unique_constraints,
        UniqueConstraintDefinition::sorted_columns,
        |u| u.name.as_str(),
    );
    for (l, r) in matched {
        if l.nulls_distinct != r.nulls_distinct {
            diffs.push(drop_unique(schema, old_table, r));
            added_unique(schema, table, l, diffs);
        } else if l.name != r.name {
            diffs.push(rename_constraint(schema, table, &r.name, &l.name, None));
        }
    }
    for unique in added {
        added_unique(schema, table, unique, diffs);
    }
    for unique in dropped {
        diffs.push(drop_unique(schema, old_table, unique));
    }

    let (matched, added, dropped) = match_objects(
        &local.check_constraints,
        &remote.check_constraints,
        |c| c.content_hash.clone(),
        |c| c.name.as_str(),
    );
    for (l, r) in matched {
        let rehash = carried_rehash(renames, table, &l.content_hash);
        if l.name != r.name || rehash.is_some() {
            diffs.push(rename_constraint(schema, table, &r.name, &l.name, rehash));
        }
    }
    for check in added {
        diffs.push(Diff::new(
            schema,
            Some(table),
            Some(&check.name),
            DiffKind::CreateCheckConstraint { check: check.clone() },
        ));
    }
    for check in dropped {
        diffs.push(drop_check(schema, old_table, check));
    }

    let (matched, added, dropped) = match_objects(
        &local.indexes,
        &remote.indexes,
        |i| i.content_hash.clone(),
        |i| i.name.as_str(),
    );
    for (l, r) in matched {
        let rehash = carried_rehash(renames, table, &l.content_hash);
        if l.name != r.name || rehash.is_some() {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(&l.name),
                DiffKind::ChangeIndex { from: r.name.clone(), to: l.name.clone(), rehash },
            ));
        }
    }
    for index in added {
        diffs.push(create_index(schema, table, index, true));
    }
    for index in dropped {
        diffs.push(drop_index(schema, old_table, index, true));
    }

    let (matched, added, dropped) = match_objects(
        &local.triggers,
        &remote.triggers,
        |t| t.content_hash.clone(),
        |t| t.name.as_str(),
    );
    for (l, r) in matched {
        let rehash = carried_rehash(renames, table, &l.content_hash);
        if l.name != r.name || rehash.is_some() {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(&l.name),
                DiffKind::RenameTrigger { from: r.name.clone(), to: l.name.clone(), rehash },
            ));
        }
    }
    for trigger in added {
        diffs.push(Diff::new(
            schema,
            Some(table),
            Some(&trigger.name),
            DiffKind::CreateTrigger { trigger: trigger.clone() },
        ));
    }
    for trigger in dropped {
        diffs.push(drop_trigger(schema, old_table, trigger));
    }
}

fn added_unique(schema: &str, table: &str, unique: &UniqueConstraintDefinition, diffs: &mut Vec<Diff>) {
    diffs.push(Diff::new(
        schema,
        Some(table),
        Some(&unique.name),
        DiffKind::CreateUniqueConstraint { unique: unique.clone(), on_existing_table: true },
    ));
}

/// Returns the key columns whose NOT NULL is folded into `createPrimaryKey`.
fn diff_primary_key(
    schema: &str,
    local: &TableDefinition,
    remote: &TableDefinition,
    diffs: &mut Vec<Diff>,
) -> HashSet<String> {
    let table = local.name.as_str();
    let create = |pk: &PrimaryKeyDefinition, diffs: &mut Vec<Diff>| {
        let nullable_columns: Vec<String> = pk
            .columns
            .iter()
            .filter(|c| remote.column(c).is_some_and(|col| col.is_nullable))
            // A column gaining identity is made NOT NULL by that earlier step.
            .filter(|c| !gains_identity(local, remote, c))
            .cloned()
            .collect();
        let folded = nullable_columns.iter().cloned().collect();
        diffs.push(Diff::new(
            schema,
            Some(table),
            Some(&pk.name),
            DiffKind::CreatePrimaryKey {
                primary_key: pk.clone(),
                nullable_columns,
                on_existing_table: true,
            },
        ));
        folded
    };
    let drop = |pk: &PrimaryKeyDefinition, diffs: &mut Vec<Diff>| {
        diffs.push(Diff::new(
            schema,
            Some(table),
            Some(&pk.name),
            DiffKind::DropPrimaryKey { primary_key: pk.clone() },
        ));
    };

    match (&local.primary_key, &remote.primary_key) {
        (Some(l), Some(r)) if l.columns == r.columns => {
            if l.name != r.name {
                diffs.push(rename_constraint(schema, table, &r.name, &l.name, None));
            }
            HashSet::new()
        }
        (Some(l), Some(r)) => {
            drop(r, diffs);
            create(l, diffs)
        }
        (Some(l), None) => create(l, diffs),
        (None, Some(r)) => {
            drop(r, diffs);
            HashSet::new()
        }
        (None, None) => HashSet::new(),
    }
}

fn gains_identity(local: &TableDefinition, remote: &TableDefinition, column: &str) -> bool {
    local.column(column).is_some_and(|c| c.identity != Identity::None)
        && remote.column(column).is_some_and(|c| c.identity == Identity::None)
}

fn diff_columns(
    schema: &str,
    local: &TableDefinition,
    remote: &TableDefinition,
    renames: &AppliedRenames,
    pk_nullable: &HashSet<String>,
    diffs: &mut Vec<Diff>,
) {
    let table = local.name.as_str();

    for column in local.columns.values() {
        let name = column.name.as_str();
        let Some(existing) = remote.column(name) else {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::CreateColumn { column: column.clone() },
            ));
            continue;
        };

        if column.canonical_type() != existing.canonical_type() {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::ChangeColumn {
                    column: name.to_string(),
                    from_type: existing.data_type.clone(),
                    to_type: column.data_type.clone(),
                },
            ));
        }

        // Identity needs NOT NULL in place, so it carries that step itself.
        let identity_not_null = gains_identity(local, remote, name) && existing.is_nullable;
        if column.identity != existing.identity {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::ChangeColumnIdentity {
                    column: name.to_string(),
                    from: existing.identity,
                    to: column.identity,
                    set_not_null: identity_not_null,
                },
            ));
        }

        match (&column.default_value, &existing.default_value) {
            (Some(desired), Some(current)) if desired.content_hash == current.content_hash => {}
            (Some(desired), current) => diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::SetColumnDefault {
                    column: name.to_string(),
                    value: desired.clone(),
                    previous: current.clone(),
                },
            )),
            (None, Some(current)) => {
                // Runs before column renames, so it addresses the old name.
                let old_name = renames.original_column(table, name);
                diffs.push(Diff::new(
                    schema,
                    Some(table),
                    Some(old_name),
                    DiffKind::DropColumnDefault {
                        column: old_name.to_string(),
                        previous: current.clone(),
                    },
                ));
            }
            (None, None) => {}
        }

        let folded = pk_nullable.contains(name) || identity_not_null;
        if !column.is_nullable && existing.is_nullable && !folded {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::SetColumnNotNull { column: name.to_string() },
            ));
        } else if column.is_nullable && !existing.is_nullable {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(name),
                DiffKind::DropColumnNotNull { column: name.to_string() },
            ));
        }
    }

    for column in remote.columns.values() {
        if !local.columns.contains_key(&column.name) {
            diffs.push(Diff::new(
                schema,
                Some(table),
                Some(&column.name),
                DiffKind::DropColumn { column: column.clone() },
            ));
        }
    }
}

/// Drop and recreate foreign keys whose referenced key is being dropped.
///
/// Postgres refuses to drop a primary key or unique constraint while a
/// foreign key depends on it, even if the same key is recreated right after.
/// `remote` and `renames` are keyed by schema name; `remote` holds the
/// rename-resolved snapshots.
pub fn cascade_dependent_foreign_keys(
    diffs: &mut Vec<Diff>,
    local: &BTreeMap<String, SchemaSnapshot>,
    remote: &BTreeMap<String, SchemaSnapshot>,
    renames: &BTreeMap<String, AppliedRenames>,
) {
    let dropped_tables: HashSet<(String, String)> = diffs
        .iter()
        .filter(|d| d.diff_type() == DiffType::DropTable)
        .filter_map(|d| d.table.clone().map(|t| (d.schema.clone(), t)))
        .collect();

    let dropped_keys: Vec<(String, String, Vec<String>)> = diffs
        .iter()
        .filter_map(|d| {
            let table = d.table.clone()?;
            if dropped_tables.contains(&(d.schema.clone(), table.clone())) {
                return None;
            }
            match &d.kind {
                DiffKind::DropPrimaryKey { primary_key } => {
                    Some((d.schema.clone(), table, primary_key.columns.clone()))
                }
                DiffKind::DropUniqueConstraint { unique } => {
                    // Unique drops run before renames; key by the new name.
                    let current = renames
                        .get(&d.schema)
                        .and_then(|r| r.tables.iter().find(|p| p.from == table))
                        .map_or(table, |p| p.to.clone());
                    Some((d.schema.clone(), current, unique.columns.clone()))
                }
                _ => None,
            }
        })
        .collect();

    if dropped_keys.is_empty() {
        return;
    }

    let already_dropped: HashSet<(String, String)> = diffs
        .iter()
        .filter(|d| d.diff_type() == DiffType::DropForeignKey)
        .filter_map(|d| d.object_name.clone().map(|n| (d.schema.clone(), n)))
        .collect();
    let already_created: HashSet<(String, String)> = diffs
        .iter()
        .filter(|d| d.diff_type() == DiffType::CreateForeignKey)
        .filter_map(|d| d.object_name.clone().map(|n| (d.schema.clone(), n)))
        .collect();

    let mut extra = Vec::new();
    for (schema_name, snapshot) in remote {
        let schema_renames = renames.get(schema_name).cloned().unwrap_or_default();
        for owner in snapshot.tables.values() {
            for fk in &owner.foreign_keys {
                let depends = dropped_keys
                    .iter()
                    .any(|(s, t, cols)| fk.targets(s, t, cols));
                if !depends || already_dropped.contains(&(schema_name.clone(), fk.name.clone())) {
                    continue;
                }
                let old_owner = schema_renames.original_table(&owner.name);
                debug!(foreign_key = %fk.name, "recreating foreign key around dropped key");
                extra.push(drop_foreign_key(schema_name, old_owner, fk));

                let desired = local
                    .get(schema_name)
                    .and_then(|s| s.table(&owner.name))
                    .and_then(|t| t.foreign_keys.iter().find(|l| l.shape() == fk.shape()));
                if let Some(desired) = desired {
                    if !already_created.contains(&(schema_name.clone(), desired.name.clone())) {
                        extra.push(create_foreign_key(schema_name, &owner.name, desired));
                    }
                }
            }
        }
    }
    diffs.extend(extra);
}
