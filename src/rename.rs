//! Applying confirmed table and column renames to the live snapshot.
//!
//! The resolver never guesses. A [`RenamePrompt`] decides which renames are
//! real (a fixed map, the `renameFrom` hints of the schema file, or a human at
//! a terminal) and [`resolve_renames`] relabels the remote snapshot so the
//! renamed objects are compared against their desired counterparts instead of
//! being diffed as a drop and a create.

use crate::error::{PgdeltaError, Result};
use crate::schema::{CheckConstraintDefinition, SchemaSnapshot, TableDefinition};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePair {
    pub from: String,
    pub to: String,
}

impl RenamePair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Confirmed renames for one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameMap {
    pub tables: Vec<RenamePair>,
    /// Column renames keyed by the table's desired (new) name.
    pub columns: BTreeMap<String, Vec<RenamePair>>,
}

impl RenameMap {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.values().all(Vec::is_empty)
    }

    pub fn rename_table(mut self, from: &str, to: &str) -> Self {
        self.tables.push(RenamePair::new(from, to));
        self
    }

    pub fn rename_column(mut self, table: &str, from: &str, to: &str) -> Self {
        self.columns
            .entry(table.to_string())
            .or_default()
            .push(RenamePair::new(from, to));
        self
    }
}

/// Dropped/added pairs of equal shape, offered to a prompt for confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameCandidates {
    pub tables: Vec<RenamePair>,
    pub columns: BTreeMap<String, Vec<RenamePair>>,
}

impl RenameCandidates {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

fn column_signature(table: &TableDefinition) -> BTreeSet<(String, String)> {
    table
        .columns
        .values()
        .map(|c| (c.name.clone(), c.canonical_type()))
        .collect()
}

/// List tables and columns that disappeared while an identically shaped one
/// appeared.
pub fn rename_candidates(local: &SchemaSnapshot, remote: &SchemaSnapshot) -> RenameCandidates {
    let mut candidates = RenameCandidates::default();

    let dropped: Vec<&TableDefinition> = remote
        .tables
        .values()
        .filter(|t| !local.tables.contains_key(&t.name))
        .collect();
    let added: Vec<&TableDefinition> = local
        .tables
        .values()
        .filter(|t| !remote.tables.contains_key(&t.name))
        .collect();

    for old in &dropped {
        let signature = column_signature(old);
        for new in &added {
            if column_signature(new) == signature {
                candidates.tables.push(RenamePair::new(&old.name, &new.name));
            }
        }
    }

    for (name, local_table) in &local.tables {
        let Some(remote_table) = remote.tables.get(name) else {
            continue;
        };
        let mut pairs = Vec::new();
        for old in remote_table.columns.values() {
            if local_table.columns.contains_key(&old.name) {
                continue;
            }
            for new in local_table.columns.values() {
                if !remote_table.columns.contains_key(&new.name) && new.same_shape(old) {
                    pairs.push(RenamePair::new(&old.name, &new.name));
                }
            }
        }
        if !pairs.is_empty() {
            candidates.columns.insert(name.clone(), pairs);
        }
    }

    candidates
}

/// Source of confirmed renames, injected into the planner.
pub trait RenamePrompt {
    fn resolve(&self, local: &SchemaSnapshot, remote: &SchemaSnapshot) -> Result<RenameMap>;
}

/// Never renames anything.
pub struct NoRenames;

impl RenamePrompt for NoRenames {
    fn resolve(&self, _local: &SchemaSnapshot, _remote: &SchemaSnapshot) -> Result<RenameMap> {
        Ok(RenameMap::default())
    }
}

/// A fixed map per schema, typically from the `[renames]` config section.
#[derive(Debug, Clone, Default)]
pub struct FixedRenames {
    pub schemas: BTreeMap<String, RenameMap>,
}

impl FixedRenames {
    pub fn new(schemas: BTreeMap<String, RenameMap>) -> Self {
        Self { schemas }
    }
}

impl RenamePrompt for FixedRenames {
    fn resolve(&self, local: &SchemaSnapshot, _remote: &SchemaSnapshot) -> Result<RenameMap> {
        Ok(self.schemas.get(&local.schema_name).cloned().unwrap_or_default())
    }
}

/// Renames declared with `renameFrom` in the desired schema.
///
/// A hint is only honored while the old name still exists remotely and the
/// new one does not, so re-running after the rename is a no-op.
pub struct DeclaredRenames;

impl RenamePrompt for DeclaredRenames {
    fn resolve(&self, local: &SchemaSnapshot, remote: &SchemaSnapshot) -> Result<RenameMap> {
        let mut map = RenameMap::default();

        for table in local.tables.values() {
            let remote_name = match &table.rename_from {
                Some(old) if remote.tables.contains_key(old) && !remote.tables.contains_key(&table.name) => {
                    map.tables.push(RenamePair::new(old, &table.name));
                    old.as_str()
                }
                _ => table.name.as_str(),
            };
            let Some(remote_table) = remote.tables.get(remote_name) else {
                continue;
            };
            for column in table.columns.values() {
                if let Some(old) = &column.rename_from {
                    if remote_table.columns.contains_key(old)
                        && !remote_table.columns.contains_key(&column.name)
                    {
                        map = map.rename_column(&table.name, old, &column.name);
                    }
                }
            }
        }

        Ok(map)
    }
}

/// Concatenates the maps of two prompts; the resolver skips repeated pairs.
pub struct Chain<A, B>(pub A, pub B);

impl<A: RenamePrompt, B: RenamePrompt> RenamePrompt for Chain<A, B> {
    fn resolve(&self, local: &SchemaSnapshot, remote: &SchemaSnapshot) -> Result<RenameMap> {
        let mut map = self.0.resolve(local, remote)?;
        let second = self.1.resolve(local, remote)?;
        map.tables.extend(second.tables);
        for (table, pairs) in second.columns {
            map.columns.entry(table).or_default().extend(pairs);
        }
        Ok(map)
    }
}

/// A stored content hash replaced by the desired object's hash because a
/// column rename changed the object's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedHash {
    /// New name of the owning table
    pub table: String,
    /// Hash stored in the database comment
    pub stored: String,
    pub current: String,
}

/// Renames that were actually applied to the remote snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedRenames {
    pub tables: Vec<RenamePair>,
    /// `(table, pair)`; `table` is the table's new name.
    pub columns: Vec<(String, RenamePair)>,
    pub carried_hashes: Vec<CarriedHash>,
}

impl AppliedRenames {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    /// Remote name of a (possibly renamed) table.
    pub fn original_table<'a>(&'a self, table: &'a str) -> &'a str {
        self.tables
            .iter()
            .find(|pair| pair.to == table)
            .map_or(table, |pair| pair.from.as_str())
    }

    /// Remote name of a (possibly renamed) column of `table`.
    pub fn original_column<'a>(&'a self, table: &str, column: &'a str) -> &'a str {
        self.columns
            .iter()
            .find(|(t, pair)| t == table && pair.to == column)
            .map_or(column, |(_, pair)| pair.from.as_str())
    }

    pub fn is_renamed_table(&self, table: &str) -> bool {
        self.tables.iter().any(|pair| pair.to == table)
    }

    /// Hash stored in the database for an object of `table` whose desired
    /// hash is `current`, when the two differ only by a column rename.
    pub fn stored_hash(&self, table: &str, current: &str) -> Option<&str> {
        self.carried_hashes
            .iter()
            .find(|c| c.table == table && c.current == current)
            .map(|c| c.stored.as_str())
    }
}

/// Relabel renamed tables and columns of `remote` so they line up with `local`.
pub fn resolve_renames(
    local: &SchemaSnapshot,
    remote: &SchemaSnapshot,
    renames: &RenameMap,
) -> Result<(SchemaSnapshot, AppliedRenames)> {
    let mut resolved = remote.clone();
    let mut applied = AppliedRenames::default();
    let schema = resolved.schema_name.clone();

    for pair in &renames.tables {
        let has_from = resolved.tables.contains_key(&pair.from);
        let has_to = resolved.tables.contains_key(&pair.to);
        match (has_from, has_to) {
            (false, true) => {
                debug!(from = %pair.from, to = %pair.to, "table rename already applied");
                continue;
            }
            (false, false) => {
                warn!(from = %pair.from, to = %pair.to, "table to rename does not exist, ignoring");
                continue;
            }
            (true, true) => {
                return Err(PgdeltaError::RenameConflict {
                    kind: "table",
                    from: format!("{}.{}", schema, pair.from),
                    to: pair.to.clone(),
                    message: "both tables exist in the database".into(),
                });
            }
            (true, false) => {}
        }
        if !local.tables.contains_key(&pair.to) {
            return Err(PgdeltaError::RenameConflict {
                kind: "table",
                from: format!("{}.{}", schema, pair.from),
                to: pair.to.clone(),
                message: "the new name is not declared in the desired schema".into(),
            });
        }

        if let Some(mut table) = resolved.tables.remove(&pair.from) {
            table.name = pair.to.clone();
            resolved.tables.insert(pair.to.clone(), table);
        }
        retarget_table(&mut resolved, &schema, &pair.from, &pair.to);
        debug!(schema = %schema, from = %pair.from, to = %pair.to, "applied table rename");
        applied.tables.push(pair.clone());
    }

    for (table_name, pairs) in &renames.columns {
        let mut renamed = Vec::new();
        for pair in pairs {
            let Some(remote_table) = resolved.tables.get(table_name) else {
                warn!(table = %table_name, "table for column rename does not exist, ignoring");
                continue;
            };
            let has_from = remote_table.columns.contains_key(&pair.from);
            let has_to = remote_table.columns.contains_key(&pair.to);
            match (has_from, has_to) {
                (false, true) => {
                    debug!(table = %table_name, from = %pair.from, to = %pair.to, "column rename already applied");
                    continue;
                }
                (false, false) => {
                    warn!(table = %table_name, from = %pair.from, "column to rename does not exist, ignoring");
                    continue;
                }
                (true, true) => {
                    return Err(PgdeltaError::RenameConflict {
                        kind: "column",
                        from: format!("{}.{}.{}", schema, table_name, pair.from),
                        to: pair.to.clone(),
                        message: "both columns exist in the database".into(),
                    });
                }
                (true, false) => {}
            }
            let declared = local
                .tables
                .get(table_name)
                .is_some_and(|t| t.columns.contains_key(&pair.to));
            if !declared {
                return Err(PgdeltaError::RenameConflict {
                    kind: "column",
                    from: format!("{}.{}.{}", schema, table_name, pair.from),
                    to: pair.to.clone(),
                    message: "the new name is not declared in the desired schema".into(),
                });
            }

            let pattern = identifier_pattern(&pair.from)?;
            if let Some(table) = resolved.tables.get_mut(table_name) {
                rename_column_in_table(table, pair, &pattern);
            }
            retarget_column(&mut resolved, &schema, table_name, pair);
            debug!(table = %table_name, from = %pair.from, to = %pair.to, "applied column rename");
            applied.columns.push((table_name.clone(), pair.clone()));
            renamed.push(pair.clone());
        }

        if renamed.is_empty() {
            continue;
        }
        if let (Some(table), Some(desired)) = (resolved.tables.get_mut(table_name), local.tables.get(table_name)) {
            carry_hashes(table, desired, &renamed, &mut applied.carried_hashes)?;
        }
    }

    Ok((resolved, applied))
}

fn identifier_pattern(ident: &str) -> Result<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(ident)))
        .map_err(|e| PgdeltaError::Internal(format!("invalid rename pattern for '{}': {}", ident, e)))
}

fn replace_name(names: &mut [String], pair: &RenamePair) {
    for name in names.iter_mut() {
        if *name == pair.from {
            *name = pair.to.clone();
        }
    }
}

fn rename_column_in_table(table: &mut TableDefinition, pair: &RenamePair, pattern: &Regex) {
    let columns = std::mem::take(&mut table.columns);
    table.columns = columns
        .into_iter()
        .map(|(key, mut column)| {
            if key == pair.from {
                column.name = pair.to.clone();
                (pair.to.clone(), column)
            } else {
                (key, column)
            }
        })
        .collect();

    if let Some(pk) = table.primary_key.as_mut() {
        replace_name(&mut pk.columns, pair);
    }
    for fk in &mut table.foreign_keys {
        replace_name(&mut fk.columns, pair);
    }
    for unique in &mut table.unique_constraints {
        replace_name(&mut unique.columns, pair);
    }

    // Stored hashes stay as they are; `carry_hashes` re-keys the ones that
    // still describe a desired object.
    let rewrite = |text: &str| pattern.replace_all(text, NoExpand(&pair.to)).into_owned();

    for check in &mut table.check_constraints {
        check.expression = rewrite(&check.expression);
    }
    for index in &mut table.indexes {
        index.columns = index.columns.iter().map(|c| rewrite(c)).collect();
        index.predicate = index.predicate.as_deref().map(rewrite);
    }
    for trigger in &mut table.triggers {
        trigger.condition = trigger.condition.as_deref().map(rewrite);
    }
}

/// Re-key checks, indexes and triggers of a table with renamed columns by the
/// hash of their desired counterpart.
///
/// A stored hash was computed from the text the object was created with, not
/// from catalog text, so it is compared against each desired object with the
/// column renames undone. Objects without such a counterpart keep their stored
/// hash and are recreated.
fn carry_hashes(
    table: &mut TableDefinition,
    desired: &TableDefinition,
    pairs: &[RenamePair],
    carried: &mut Vec<CarriedHash>,
) -> Result<()> {
    let undo: Vec<(Regex, &str)> = pairs
        .iter()
        .rev()
        .map(|pair| identifier_pattern(&pair.to).map(|pattern| (pattern, pair.from.as_str())))
        .collect::<Result<_>>()?;
    let undo_text = |text: &str| {
        undo.iter().fold(text.to_string(), |text, (pattern, from)| {
            pattern.replace_all(&text, NoExpand(from)).into_owned()
        })
    };
    let table_name = table.name.clone();
    let mut carry = |stored: &mut String, current: &str| {
        if stored.as_str() != current {
            carried.push(CarriedHash {
                table: table_name.clone(),
                stored: stored.clone(),
                current: current.to_string(),
            });
            *stored = current.to_string();
        }
    };

    for check in &mut table.check_constraints {
        let counterpart = desired
            .check_constraints
            .iter()
            .find(|d| CheckConstraintDefinition::hash_expression(&undo_text(d.expression.as_str())) == check.content_hash);
        if let Some(d) = counterpart {
            carry(&mut check.content_hash, &d.content_hash);
        }
    }
    for index in &mut table.indexes {
        let counterpart = desired.indexes.iter().find(|d| {
            let mut before = (*d).clone();
            before.columns = d.columns.iter().map(|c| undo_text(c.as_str())).collect();
            before.predicate = d.predicate.as_deref().map(|p| undo_text(p));
            before.compute_content_hash() == index.content_hash
        });
        if let Some(d) = counterpart {
            carry(&mut index.content_hash, &d.content_hash);
        }
    }
    for trigger in &mut table.triggers {
        let counterpart = desired.triggers.iter().find(|d| {
            let mut before = (*d).clone();
            before.condition = d.condition.as_deref().map(|c| undo_text(c));
            before.compute_content_hash() == trigger.content_hash
        });
        if let Some(d) = counterpart {
            carry(&mut trigger.content_hash, &d.content_hash);
        }
    }
    Ok(())
}

/// Point foreign keys at a renamed table, as Postgres does on `RENAME TO`.
pub fn retarget_table(snapshot: &mut SchemaSnapshot, schema: &str, from: &str, to: &str) {
    for table in snapshot.tables.values_mut() {
        for fk in &mut table.foreign_keys {
            if fk.target_schema == schema && fk.target_table == from {
                fk.target_table = to.to_string();
            }
        }
    }
}

/// Point foreign keys at a renamed column of `schema.table`.
pub fn retarget_column(snapshot: &mut SchemaSnapshot, schema: &str, table: &str, pair: &RenamePair) {
    for owner in snapshot.tables.values_mut() {
        for fk in &mut owner.foreign_keys {
            if fk.target_schema == schema && fk.target_table == table {
                replace_name(&mut fk.target_columns, pair);
            }
        }
    }
}
