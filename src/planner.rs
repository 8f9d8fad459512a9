//! The planning pipeline: validate, order schemas, resolve renames, diff,
//! schedule and compile.
//!
//! Planning is all-or-nothing. Every configuration error surfaces before the
//! first changeset is compiled, so callers either get a complete plan or none.

use crate::analysis::SchemaGraph;
use crate::compile::{compile, Changeset, CompileOptions};
use crate::diff::{cascade_dependent_foreign_keys, diff_snapshots, Diff};
use crate::error::{PgdeltaError, Result};
use crate::priority::schedule;
use crate::rename::{resolve_renames, retarget_column, retarget_table, AppliedRenames, RenamePrompt};
use crate::schema::SchemaSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Diffs for every schema, in execution order.
pub fn plan_diffs(
    local: &[SchemaSnapshot],
    remote: &[SchemaSnapshot],
    prompt: &dyn RenamePrompt,
) -> Result<Vec<Diff>> {
    let mut local = index_by_schema(local)?;
    let remote = index_by_schema(remote)?;

    for snapshot in local.values_mut() {
        snapshot.require_key_columns();
        snapshot.validate()?;
    }
    check_foreign_key_targets(&local, &remote)?;

    let schema_order = SchemaGraph::build(local.values().chain(remote.values())).creation_order()?;
    debug!(order = ?schema_order, "schema order");

    let (resolved, renames) = resolve_all_renames(&local, &remote, prompt)?;

    let names: BTreeSet<&String> = local.keys().chain(resolved.keys()).collect();
    let mut diffs = Vec::new();
    for name in names {
        let applied = renames.get(name).cloned().unwrap_or_default();
        diffs.extend(diff_snapshots(local.get(name), resolved.get(name), &applied)?);
    }
    cascade_dependent_foreign_keys(&mut diffs, &local, &resolved, &renames);

    Ok(schedule(diffs, &schema_order))
}

/// Plan and compile the changesets that turn `remote` into `local`.
///
/// A schema present only in `local` is created, one present only in `remote`
/// is dropped. Callers that manage a subset of schemas pass only that subset.
pub fn plan_changesets(
    local: &[SchemaSnapshot],
    remote: &[SchemaSnapshot],
    prompt: &dyn RenamePrompt,
    options: &CompileOptions,
) -> Result<Vec<Changeset>> {
    let diffs = plan_diffs(local, remote, prompt)?;
    let changesets = compile(&diffs, options);
    info!(changesets = changesets.len(), "planned migration");
    Ok(changesets)
}

fn index_by_schema(snapshots: &[SchemaSnapshot]) -> Result<BTreeMap<String, SchemaSnapshot>> {
    let mut map = BTreeMap::new();
    for snapshot in snapshots {
        if map.insert(snapshot.schema_name.clone(), snapshot.clone()).is_some() {
            return Err(PgdeltaError::DuplicateObject {
                kind: "schema",
                name: snapshot.schema_name.clone(),
                owner: "snapshot list".into(),
            });
        }
    }
    Ok(map)
}

/// Every desired foreign key must point at a table some snapshot knows about.
fn check_foreign_key_targets(
    local: &BTreeMap<String, SchemaSnapshot>,
    remote: &BTreeMap<String, SchemaSnapshot>,
) -> Result<()> {
    let known = |schema: &str, table: &str| {
        [local, remote]
            .iter()
            .any(|side| side.get(schema).is_some_and(|s| s.tables.contains_key(table)))
    };

    for snapshot in local.values() {
        for table in snapshot.tables.values() {
            for fk in &table.foreign_keys {
                if !known(&fk.target_schema, &fk.target_table) {
                    return Err(PgdeltaError::DanglingForeignKey {
                        schema: snapshot.schema_name.clone(),
                        table: table.name.clone(),
                        constraint: fk.name.clone(),
                        target_schema: fk.target_schema.clone(),
                        target_table: fk.target_table.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Resolve renames schema by schema, then point foreign keys in other
/// schemas at the new names.
fn resolve_all_renames(
    local: &BTreeMap<String, SchemaSnapshot>,
    remote: &BTreeMap<String, SchemaSnapshot>,
    prompt: &dyn RenamePrompt,
) -> Result<(BTreeMap<String, SchemaSnapshot>, BTreeMap<String, AppliedRenames>)> {
    let mut resolved = BTreeMap::new();
    let mut renames = BTreeMap::new();

    for (name, live) in remote {
        match local.get(name) {
            Some(desired) => {
                let map = prompt.resolve(desired, live)?;
                let (snapshot, applied) = resolve_renames(desired, live, &map)?;
                if !applied.is_empty() {
                    debug!(
                        schema = %name,
                        tables = applied.tables.len(),
                        columns = applied.columns.len(),
                        "applied renames"
                    );
                    renames.insert(name.clone(), applied);
                }
                resolved.insert(name.clone(), snapshot);
            }
            None => {
                resolved.insert(name.clone(), live.clone());
            }
        }
    }

    for (owner, applied) in &renames {
        for (name, snapshot) in resolved.iter_mut() {
            if name == owner {
                continue;
            }
            for pair in &applied.tables {
                retarget_table(snapshot, owner, &pair.from, &pair.to);
            }
            for (table, pair) in &applied.columns {
                retarget_column(snapshot, owner, table, pair);
            }
        }
    }

    Ok((resolved, renames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffType;
    use crate::rename::{NoRenames, RenameMap, FixedRenames};
    use crate::schema::{ColumnDefinition, EnumDefinition, ForeignKeyDefinition, TableDefinition};

    fn table_with_fk(name: &str, target_schema: &str, target: &str) -> TableDefinition {
        TableDefinition::new(name)
            .with_column(ColumnDefinition::new("ref_id", "integer"))
            .with_foreign_key(ForeignKeyDefinition::new(
                name,
                vec!["ref_id".into()],
                target_schema,
                target,
                vec!["id".into()],
            ))
    }

    fn keyed(name: &str) -> TableDefinition {
        TableDefinition::new(name)
            .with_column(ColumnDefinition::new("id", "integer"))
            .with_primary_key(&["id"])
    }

    #[test]
    fn test_dangling_foreign_key_fails_before_planning() {
        let local = vec![SchemaSnapshot::new("public").with_table(table_with_fk("orders", "public", "customers"))];
        let err = plan_changesets(&local, &[], &NoRenames, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, PgdeltaError::DanglingForeignKey { ref target_table, .. } if target_table == "customers"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_foreign_key_target_may_exist_only_remotely() {
        let local = vec![SchemaSnapshot::new("public").with_table(table_with_fk("orders", "public", "customers"))];
        let remote = vec![SchemaSnapshot::new("public").with_table(keyed("customers"))];
        assert!(plan_diffs(&local, &remote, &NoRenames).is_ok());
    }

    #[test]
    fn test_schema_cycle_is_rejected() {
        let local = vec![
            SchemaSnapshot::new("a").with_table(keyed("t")).with_table(table_with_fk("r", "b", "t")),
            SchemaSnapshot::new("b").with_table(keyed("t")).with_table(table_with_fk("r", "a", "t")),
        ];
        let err = plan_diffs(&local, &[], &NoRenames).unwrap_err();
        assert!(matches!(err, PgdeltaError::SchemaCycle(_)));
    }

    #[test]
    fn test_enum_removal_rejected_without_partial_plan() {
        let local = vec![SchemaSnapshot::new("public").with_enum(EnumDefinition::new("mood", &["happy"]))];
        let remote = vec![SchemaSnapshot::new("public").with_enum(EnumDefinition::new("mood", &["happy", "sad"]))];
        let err = plan_changesets(&local, &remote, &NoRenames, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, PgdeltaError::UnsupportedEnumChange { .. }));
    }

    #[test]
    fn test_schemas_created_in_dependency_order() {
        let local = vec![
            SchemaSnapshot::new("app").with_table(table_with_fk("orders", "billing", "accounts")),
            SchemaSnapshot::new("billing").with_table(keyed("accounts")),
        ];
        let diffs = plan_diffs(&local, &[], &NoRenames).unwrap();
        let creates: Vec<&str> = diffs
            .iter()
            .filter(|d| d.diff_type() == DiffType::CreateSchema)
            .map(|d| d.schema.as_str())
            .collect();
        assert_eq!(creates, vec!["billing", "app"]);
    }

    #[test]
    fn test_cross_schema_foreign_keys_follow_table_rename() {
        let fk_target = |table: &str| {
            SchemaSnapshot::new("app").with_table(
                TableDefinition::new("orders")
                    .with_column(ColumnDefinition::new("ref_id", "integer"))
                    .with_foreign_key(
                        ForeignKeyDefinition::new("orders", vec!["ref_id".into()], "billing", table, vec!["id".into()]),
                    ),
            )
        };
        let remote = vec![fk_target("accounts"), SchemaSnapshot::new("billing").with_table(keyed("accounts"))];
        let local = vec![fk_target("ledgers"), SchemaSnapshot::new("billing").with_table(keyed("ledgers"))];

        let renames = FixedRenames::new(BTreeMap::from([(
            "billing".to_string(),
            RenameMap::default().rename_table("accounts", "ledgers"),
        )]));
        let types: Vec<DiffType> = plan_diffs(&local, &remote, &renames)
            .unwrap()
            .iter()
            .map(Diff::diff_type)
            .collect();

        // Retargeted, the foreign key matches by shape and is only renamed.
        assert!(types.contains(&DiffType::ChangeTable));
        assert!(types.contains(&DiffType::RenameConstraint));
        assert!(!types.contains(&DiffType::DropForeignKey));
        assert!(!types.contains(&DiffType::CreateTable));
    }
}
