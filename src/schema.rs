//! Snapshot model shared by the desired (local) and live (remote) schema.
//!
//! All identifiers are physical names. Constructors that take a table name
//! generate the object's name with [`generated_name`] and compute its content
//! hash, so a snapshot built from declarations and one read back from the
//! catalog line up name-for-name once the database has converged.

use crate::error::{PgdeltaError, Result};
use crate::naming::{content_hash, generated_name, qualified, quote_ident, NameKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue {
    /// Default expression as it is written into `SET DEFAULT`.
    pub sql: String,
    /// Fingerprint of `sql`; empty when the catalog carries no stored hash.
    pub content_hash: String,
}

impl DefaultValue {
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let content_hash = content_hash("default", &[&sql]);
        Self { sql, content_hash }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Identity {
    #[default]
    None,
    Always,
    ByDefault,
}

impl Identity {
    /// `GENERATED ... AS IDENTITY` clause, if any.
    pub fn clause(&self) -> Option<&'static str> {
        match self {
            Identity::None => None,
            Identity::Always => Some("GENERATED ALWAYS AS IDENTITY"),
            Identity::ByDefault => Some("GENERATED BY DEFAULT AS IDENTITY"),
        }
    }

    /// Decode `pg_attribute.attidentity`.
    pub fn from_catalog(code: &str) -> Self {
        match code {
            "a" => Identity::Always,
            "d" => Identity::ByDefault,
            _ => Identity::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<DefaultValue>,
    pub identity: Identity,
    /// Prior name, set only while building the local snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_from: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            identity: Identity::None,
            rename_from: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn with_default(mut self, sql: impl Into<String>) -> Self {
        self.default_value = Some(DefaultValue::new(sql));
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        if identity != Identity::None {
            self.is_nullable = false;
        }
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.rename_from = Some(previous.into());
        self
    }

    /// Canonical type string used for comparison.
    pub fn canonical_type(&self) -> String {
        self.data_type.trim().to_lowercase()
    }

    /// Same type, nullability and identity; used to propose rename candidates.
    pub fn same_shape(&self, other: &ColumnDefinition) -> bool {
        self.canonical_type() == other.canonical_type()
            && self.is_nullable == other.is_nullable
            && self.identity == other.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyDefinition {
    pub name: String,
    /// Declaration order is kept; it is the order of the backing index.
    pub columns: Vec<String>,
}

impl PrimaryKeyDefinition {
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        let name = generated_name(table, NameKind::PrimaryKey { columns: &columns });
        Self { name, columns }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Decode `pg_constraint.confdeltype` / `confupdtype`.
    pub fn from_catalog(code: &str) -> Self {
        match code {
            "r" => ReferentialAction::Restrict,
            "c" => ReferentialAction::Cascade,
            "n" => ReferentialAction::SetNull,
            "d" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }

    /// Parse the spelling used in schema files (`cascade`, `set null`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "no action" => Some(ReferentialAction::NoAction),
            "restrict" => Some(ReferentialAction::Restrict),
            "cascade" => Some(ReferentialAction::Cascade),
            "set null" => Some(ReferentialAction::SetNull),
            "set default" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub target_schema: String,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// What a foreign key connects, independent of its name and actions.
pub type ForeignKeyShape = (String, String, Vec<(String, String)>);

impl ForeignKeyDefinition {
    pub fn new(
        table: &str,
        columns: Vec<String>,
        target_schema: impl Into<String>,
        target_table: impl Into<String>,
        target_columns: Vec<String>,
    ) -> Self {
        let target_schema = target_schema.into();
        let target_table = target_table.into();
        let name = generated_name(
            table,
            NameKind::ForeignKey {
                columns: &columns,
                target_schema: &target_schema,
                target_table: &target_table,
                target_columns: &target_columns,
            },
        );
        Self {
            name,
            columns,
            target_schema,
            target_table,
            target_columns,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Column pairs sorted by local column, so declaration order is irrelevant.
    pub fn shape(&self) -> ForeignKeyShape {
        let mut pairs: Vec<(String, String)> = self
            .columns
            .iter()
            .cloned()
            .zip(self.target_columns.iter().cloned())
            .collect();
        pairs.sort();
        (self.target_schema.clone(), self.target_table.clone(), pairs)
    }

    /// Whether this key points at exactly `columns` of `schema.table`.
    pub fn targets(&self, schema: &str, table: &str, columns: &[String]) -> bool {
        let mut mine = self.target_columns.clone();
        mine.sort();
        let mut theirs = columns.to_vec();
        theirs.sort();
        self.target_schema == schema && self.target_table == table && mine == theirs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraintDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub nulls_distinct: bool,
}

impl UniqueConstraintDefinition {
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        let name = generated_name(table, NameKind::Unique { columns: &columns });
        Self {
            name,
            columns,
            nulls_distinct: true,
        }
    }

    pub fn nulls_not_distinct(mut self) -> Self {
        self.nulls_distinct = false;
        self
    }

    pub fn sorted_columns(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        columns.sort();
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraintDefinition {
    pub name: String,
    pub expression: String,
    pub content_hash: String,
}

impl CheckConstraintDefinition {
    pub fn new(table: &str, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let content_hash = Self::hash_expression(&expression);
        let name = generated_name(table, NameKind::Check { content_hash: &content_hash });
        Self {
            name,
            expression,
            content_hash,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn hash_expression(expression: &str) -> String {
        content_hash("check", &[expression])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub unique: bool,
    /// Access method, `btree` unless stated otherwise.
    pub method: String,
    /// Key columns or expressions, in index order.
    pub columns: Vec<String>,
    pub predicate: Option<String>,
    pub content_hash: String,
}

impl IndexDefinition {
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        Self::build(table, None, false, "btree", columns, None)
    }

    pub fn build(
        table: &str,
        name: Option<String>,
        unique: bool,
        method: &str,
        columns: Vec<String>,
        predicate: Option<String>,
    ) -> Self {
        let mut index = Self {
            name: String::new(),
            unique,
            method: method.to_lowercase(),
            columns,
            predicate,
            content_hash: String::new(),
        };
        index.content_hash = index.compute_content_hash();
        index.name = name.unwrap_or_else(|| {
            generated_name(table, NameKind::Index { content_hash: &index.content_hash })
        });
        index
    }

    /// Fingerprint of everything but the index and table names.
    pub fn compute_content_hash(&self) -> String {
        let unique = if self.unique { "unique" } else { "" };
        let columns = self.columns.join(", ");
        content_hash(
            "index",
            &[unique, &self.method, &columns, self.predicate.as_deref().unwrap_or("")],
        )
    }

    /// Canonical index-creation text.
    pub fn definition(&self, schema: &str, table: &str, concurrently: bool) -> String {
        let mut sql = String::from("CREATE ");
        if self.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        if concurrently {
            sql.push_str("CONCURRENTLY ");
        }
        let elements: Vec<String> = self.columns.iter().map(|c| index_element(c)).collect();
        sql.push_str(&format!(
            "{} ON {} USING {} ({})",
            quote_ident(&self.name),
            qualified(schema, table),
            self.method,
            elements.join(", ")
        ));
        if let Some(predicate) = &self.predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        sql
    }
}

/// Bare column names are quoted; expressions and `col DESC` are passed through.
fn index_element(element: &str) -> String {
    if element.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        quote_ident(element)
    } else {
        element.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerTiming::Before => write!(f, "BEFORE"),
            TriggerTiming::After => write!(f, "AFTER"),
            TriggerTiming::InsteadOf => write!(f, "INSTEAD OF"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Insert => write!(f, "INSERT"),
            TriggerEvent::Update => write!(f, "UPDATE"),
            TriggerEvent::Delete => write!(f, "DELETE"),
            TriggerEvent::Truncate => write!(f, "TRUNCATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerLevel {
    Row,
    Statement,
}

impl fmt::Display for TriggerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerLevel::Row => write!(f, "ROW"),
            TriggerLevel::Statement => write!(f, "STATEMENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub name: String,
    pub timing: TriggerTiming,
    /// Kept sorted.
    pub events: Vec<TriggerEvent>,
    pub level: TriggerLevel,
    pub condition: Option<String>,
    /// Trigger function, optionally schema-qualified, without parentheses.
    pub function: String,
    pub content_hash: String,
}

impl TriggerDefinition {
    pub fn build(
        table: &str,
        name: Option<String>,
        timing: TriggerTiming,
        mut events: Vec<TriggerEvent>,
        level: TriggerLevel,
        condition: Option<String>,
        function: impl Into<String>,
    ) -> Self {
        events.sort();
        events.dedup();
        let function = function.into();
        let function = function.trim().trim_end_matches("()").to_string();
        let mut trigger = Self {
            name: String::new(),
            timing,
            events,
            level,
            condition,
            function,
            content_hash: String::new(),
        };
        trigger.content_hash = trigger.compute_content_hash();
        trigger.name = name.unwrap_or_else(|| {
            generated_name(table, NameKind::Trigger { content_hash: &trigger.content_hash })
        });
        trigger
    }

    fn events_sql(&self) -> String {
        self.events
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// Fingerprint of everything but the trigger and table names.
    pub fn compute_content_hash(&self) -> String {
        content_hash(
            "trigger",
            &[
                &self.timing.to_string(),
                &self.events_sql(),
                &self.level.to_string(),
                self.condition.as_deref().unwrap_or(""),
                &self.function,
            ],
        )
    }

    /// Canonical trigger-creation text.
    pub fn definition(&self, schema: &str, table: &str) -> String {
        let mut sql = format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH {}",
            quote_ident(&self.name),
            self.timing,
            self.events_sql(),
            qualified(schema, table),
            self.level
        );
        if let Some(condition) = &self.condition {
            sql.push_str(&format!(" WHEN ({})", condition));
        }
        sql.push_str(&format!(" EXECUTE FUNCTION {}()", self.function));
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumDefinition {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: IndexMap<String, ColumnDefinition>,
    pub primary_key: Option<PrimaryKeyDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub unique_constraints: Vec<UniqueConstraintDefinition>,
    pub check_constraints: Vec<CheckConstraintDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub triggers: Vec<TriggerDefinition>,
    /// Prior table name, set only while building the local snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_from: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.insert(column.name.clone(), column);
        self.require_key_columns();
        self
    }

    /// Primary key with a generated name. Key columns become NOT NULL,
    /// whether they are added before or after the key.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.primary_key = Some(PrimaryKeyDefinition::new(&self.name, columns));
        self.require_key_columns();
        self
    }

    /// Mark every primary-key column NOT NULL, as Postgres does.
    pub fn require_key_columns(&mut self) {
        let Some(pk) = &self.primary_key else {
            return;
        };
        for name in &pk.columns {
            if let Some(column) = self.columns.get_mut(name) {
                column.is_nullable = false;
            }
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyDefinition) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn with_unique(mut self, unique: UniqueConstraintDefinition) -> Self {
        self.unique_constraints.push(unique);
        self
    }

    pub fn with_check(mut self, check: CheckConstraintDefinition) -> Self {
        self.check_constraints.push(check);
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerDefinition) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.rename_from = Some(previous.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.get(name)
    }

    pub fn is_primary_key_column(&self, column: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.iter().any(|c| c == column))
    }

    /// Names of every constraint, in the namespace Postgres shares between them.
    pub fn constraint_names(&self) -> impl Iterator<Item = &str> {
        self.primary_key
            .iter()
            .map(|pk| pk.name.as_str())
            .chain(self.foreign_keys.iter().map(|fk| fk.name.as_str()))
            .chain(self.unique_constraints.iter().map(|u| u.name.as_str()))
            .chain(self.check_constraints.iter().map(|c| c.name.as_str()))
    }

    fn validate(&self, schema: &str) -> Result<()> {
        let owner = format!("{}.{}", schema, self.name);
        ensure_unique("constraint", self.constraint_names(), &owner)?;
        ensure_unique("index", self.indexes.iter().map(|i| i.name.as_str()), &owner)?;
        ensure_unique("trigger", self.triggers.iter().map(|t| t.name.as_str()), &owner)?;

        for (key, column) in &self.columns {
            if key != &column.name {
                return Err(PgdeltaError::Internal(format!(
                    "column map key '{}' does not match column '{}' in {}",
                    key, column.name, owner
                )));
            }
        }

        let referenced = self
            .primary_key
            .iter()
            .flat_map(|pk| pk.columns.iter())
            .chain(self.foreign_keys.iter().flat_map(|fk| fk.columns.iter()))
            .chain(self.unique_constraints.iter().flat_map(|u| u.columns.iter()));
        for column in referenced {
            if !self.columns.contains_key(column) {
                return Err(PgdeltaError::Configuration(format!(
                    "constraint on {} references unknown column '{}'",
                    owner, column
                )));
            }
        }

        Ok(())
    }
}

fn ensure_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
    owner: &str,
) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(PgdeltaError::DuplicateObject {
                kind,
                name: name.to_string(),
                owner: owner.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub schema_name: String,
    pub tables: BTreeMap<String, TableDefinition>,
    pub enums: BTreeMap<String, EnumDefinition>,
    pub extensions: BTreeSet<String>,
}

impl SchemaSnapshot {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            ..Default::default()
        }
    }

    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn with_enum(mut self, definition: EnumDefinition) -> Self {
        self.enums.insert(definition.name.clone(), definition);
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Check the per-schema naming invariants.
    /// Apply [`TableDefinition::require_key_columns`] to every table, for
    /// snapshots assembled field by field.
    pub fn require_key_columns(&mut self) {
        for table in self.tables.values_mut() {
            table.require_key_columns();
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, table) in &self.tables {
            if key != &table.name {
                return Err(PgdeltaError::Internal(format!(
                    "table map key '{}' does not match table '{}'",
                    key, table.name
                )));
            }
            table.validate(&self.schema_name)?;
        }
        Ok(())
    }
}
