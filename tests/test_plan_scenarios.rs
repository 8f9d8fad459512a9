mod common;

use common::assertions::*;
use common::fixtures::snapshots;
use pgdelta::naming::{generated_name, NameKind};
use pgdelta::schema::{
    CheckConstraintDefinition, ColumnDefinition, ForeignKeyDefinition, IndexDefinition, TableDefinition,
    TriggerDefinition, TriggerEvent, TriggerLevel, TriggerTiming, UniqueConstraintDefinition,
};
use pgdelta::{
    plan_changesets, plan_diffs, CompileOptions, DeclaredRenames, DiffType, FixedRenames, NoRenames, Priority,
    RenameMap, SchemaSnapshot,
};
use std::collections::BTreeMap;

fn plan(local: &[SchemaSnapshot], remote: &[SchemaSnapshot]) -> Vec<pgdelta::Changeset> {
    plan_changesets(local, remote, &NoRenames, &CompileOptions::default()).unwrap()
}

#[test]
fn test_new_tables_then_keys_then_foreign_keys() {
    let local = vec![SchemaSnapshot::new("public")
        .with_table(snapshots::books("books"))
        .with_table(snapshots::users())];

    let changesets = plan(&local, &[]);

    assert_types(
        &changesets,
        &[
            DiffType::CreateSchema,
            DiffType::CreateTable,
            DiffType::CreateTable,
            DiffType::CreatePrimaryKey,
            DiffType::CreateForeignKey,
        ],
    );
    let tables: Vec<Option<&str>> = changesets.iter().map(|c| c.table.as_deref()).collect();
    assert_eq!(
        tables,
        vec![None, Some("books"), Some("users"), Some("books"), Some("users")]
    );
}

#[test]
fn test_required_column_on_existing_table() {
    let remote = vec![SchemaSnapshot::new("public").with_table(snapshots::books("books"))];
    let local = vec![SchemaSnapshot::new("public").with_table(
        snapshots::books("books").with_column(ColumnDefinition::new("title", "text").not_null()),
    )];

    let changesets = plan(&local, &remote);
    assert_types(&changesets, &[DiffType::SetColumnNotNull]);

    let check = generated_name("books", NameKind::NotNullCheck { column: "title" });
    let changeset = &changesets[0];
    assert_eq!(
        up_sql(changeset),
        vec![
            format!("ALTER TABLE public.books ADD CONSTRAINT {} CHECK (title IS NOT NULL) NOT VALID", check),
            format!("ALTER TABLE public.books VALIDATE CONSTRAINT {}", check),
            "ALTER TABLE public.books ALTER COLUMN title SET NOT NULL".to_string(),
            format!("ALTER TABLE public.books DROP CONSTRAINT {}", check),
        ]
    );
    assert_eq!(down_sql(changeset), vec!["ALTER TABLE public.books ALTER COLUMN title DROP NOT NULL"]);
}

#[test]
fn test_table_rename_renames_index_in_place() {
    let old_index = IndexDefinition::new("books", vec!["title".into()]);
    let new_index = IndexDefinition::new("new_books", vec!["title".into()]);
    assert_ne!(old_index.name, new_index.name);

    let remote = vec![SchemaSnapshot::new("public").with_table(snapshots::books("books").with_index(old_index.clone()))];
    let local = vec![SchemaSnapshot::new("public").with_table(
        snapshots::books("new_books")
            .renamed_from("books")
            .with_index(new_index.clone()),
    )];

    let changesets = plan_changesets(&local, &remote, &DeclaredRenames, &CompileOptions::default()).unwrap();

    assert_types(
        &changesets,
        &[DiffType::ChangeTable, DiffType::ChangeIndex, DiffType::RenameConstraint],
    );
    assert_absent(&changesets, DiffType::DropIndex);
    assert_absent(&changesets, DiffType::CreateIndex);
    assert_eq!(up_sql(&changesets[0]), vec!["ALTER TABLE public.books RENAME TO new_books"]);
    assert_eq!(
        up_sql(&changesets[1]),
        vec![format!("ALTER INDEX public.{} RENAME TO {}", old_index.name, new_index.name)]
    );
}

#[test]
fn test_rename_without_hint_is_drop_and_create() {
    let remote = vec![SchemaSnapshot::new("public").with_table(snapshots::books("books"))];
    let local = vec![SchemaSnapshot::new("public").with_table(snapshots::books("new_books"))];

    let changesets = plan(&local, &remote);
    assert!(position(&changesets, DiffType::DropTable, "books") < position(&changesets, DiffType::CreateTable, "new_books"));
    assert_absent(&changesets, DiffType::ChangeTable);
}

#[test]
fn test_identical_snapshots_plan_nothing() {
    let library = vec![snapshots::library()];
    assert!(plan_diffs(&library, &library, &NoRenames).unwrap().is_empty());

    let empty = vec![SchemaSnapshot::new("public")];
    assert!(plan_diffs(&empty, &empty, &NoRenames).unwrap().is_empty());
}

#[test]
fn test_dependents_dropped_before_their_table() {
    let remote = vec![snapshots::library()];
    let local = vec![SchemaSnapshot::new("public")];

    let changesets = plan(&local, &remote);
    assert_absent(&changesets, DiffType::DropSchema);

    let mut checked = 0;
    for (i, changeset) in changesets.iter().enumerate() {
        let Some(table) = changeset.table.as_deref() else { continue };
        if changeset.priority < Priority(1006) {
            assert!(
                i < position(&changesets, DiffType::DropTable, table),
                "{} {} scheduled after its table is dropped",
                changeset.diff_type,
                changeset.label()
            );
            checked += 1;
        }
    }
    // trigger, index, unique, check and primary key on books; foreign key on users
    assert_eq!(checked, 6);
}

#[test]
fn test_dependents_created_after_their_table() {
    let local = vec![snapshots::library()];

    let changesets = plan(&local, &[]);

    let mut checked = 0;
    for (i, changeset) in changesets.iter().enumerate() {
        let Some(table) = changeset.table.as_deref() else { continue };
        if changeset.priority >= Priority(4001) {
            assert!(
                i > position(&changesets, DiffType::CreateTable, table),
                "{} {} scheduled before its table is created",
                changeset.diff_type,
                changeset.label()
            );
            checked += 1;
        }
    }
    assert_eq!(checked, 6);

    // Constraints on brand-new tables need no concurrent builds.
    assert!(changesets.iter().all(|c| c.is_transactional()));
}

#[test]
fn test_generated_names_ignore_column_order() {
    let forward = UniqueConstraintDefinition::new("books", vec!["author_id".into(), "title".into()]);
    let backward = UniqueConstraintDefinition::new("books", vec!["title".into(), "author_id".into()]);
    assert_eq!(forward.name, backward.name);

    let forward = ForeignKeyDefinition::new(
        "loans",
        vec!["book_id".into(), "edition".into()],
        "public",
        "editions",
        vec!["book_id".into(), "edition".into()],
    );
    let backward = ForeignKeyDefinition::new(
        "loans",
        vec!["edition".into(), "book_id".into()],
        "public",
        "editions",
        vec!["edition".into(), "book_id".into()],
    );
    assert_eq!(forward.name, backward.name);
    assert!(forward.name.starts_with("loans_"));
    assert!(forward.name.ends_with("_fkey"));
}

#[test]
fn test_unique_on_existing_table_is_split_out_of_transaction() {
    let remote = vec![SchemaSnapshot::new("public").with_table(snapshots::books("books"))];
    let local = vec![SchemaSnapshot::new("public").with_table(
        snapshots::books("books").with_unique(UniqueConstraintDefinition::new("books", vec!["title".into()])),
    )];

    let changesets = plan(&local, &remote);
    assert_types(&changesets, &[DiffType::CreateUniqueConstraint]);
    assert!(!changesets[0].is_transactional());
    assert!(changesets[0].up[0].cleanup.is_some());

    let direct = plan_changesets(
        &local,
        &remote,
        &NoRenames,
        &CompileOptions { concurrent_indexes: false },
    )
    .unwrap();
    assert!(direct[0].is_transactional());
}

/// `users` with a check, a partial expression index and a conditional trigger
/// that all mention `column`.
fn users_with_dependents(column: &str) -> TableDefinition {
    TableDefinition::new("users")
        .with_column(ColumnDefinition::new("id", "integer"))
        .with_column(ColumnDefinition::new(column, "text"))
        .with_primary_key(&["id"])
        .with_check(CheckConstraintDefinition::new("users", format!("{} <> ''", column)))
        .with_index(IndexDefinition::build(
            "users",
            None,
            false,
            "btree",
            vec![format!("lower({})", column)],
            Some(format!("{} IS NOT NULL", column)),
        ))
        .with_trigger(TriggerDefinition::build(
            "users",
            None,
            TriggerTiming::Before,
            vec![TriggerEvent::Update],
            TriggerLevel::Row,
            Some(format!("NEW.{c} IS DISTINCT FROM OLD.{c}", c = column)),
            "touch_updated_at",
        ))
}

/// The table as the catalog reports it: deparsed text, while names and hashes
/// are the ones written when the objects were created.
fn as_introspected(mut table: TableDefinition, column: &str) -> TableDefinition {
    table.check_constraints[0].expression = format!("({} <> ''::text)", column);
    table.indexes[0].predicate = Some(format!("({} IS NOT NULL)", column));
    table.triggers[0].condition = Some(format!("(new.{c} IS DISTINCT FROM old.{c})", c = column));
    table
}

fn mail_to_email() -> FixedRenames {
    FixedRenames::new(BTreeMap::from([(
        "public".to_string(),
        RenameMap::default().rename_column("users", "mail", "email"),
    )]))
}

#[test]
fn test_column_rename_keeps_introspected_dependents() {
    let remote = vec![SchemaSnapshot::new("public").with_table(as_introspected(users_with_dependents("mail"), "mail"))];
    let local = vec![SchemaSnapshot::new("public").with_table(users_with_dependents("email"))];

    let changesets = plan_changesets(&local, &remote, &mail_to_email(), &CompileOptions::default()).unwrap();

    assert_types(
        &changesets,
        &[
            DiffType::ChangeColumnName,
            DiffType::ChangeIndex,
            DiffType::RenameTrigger,
            DiffType::RenameConstraint,
        ],
    );
    for recreated in [
        DiffType::DropCheckConstraint,
        DiffType::CreateCheckConstraint,
        DiffType::DropIndex,
        DiffType::CreateIndex,
        DiffType::DropTrigger,
        DiffType::CreateTrigger,
    ] {
        assert_absent(&changesets, recreated);
    }

    // The stored hashes are rewritten so the next run still matches.
    let desired = local[0].table("users").unwrap();
    let check = &desired.check_constraints[0];
    assert!(up_sql(&changesets[3])
        .contains(&format!("COMMENT ON CONSTRAINT {} ON public.users IS '{}'", check.name, check.content_hash).as_str()));
    let index = &desired.indexes[0];
    assert!(up_sql(&changesets[1])
        .contains(&format!("COMMENT ON INDEX public.{} IS '{}'", index.name, index.content_hash).as_str()));
}

#[test]
fn test_column_rename_converges_after_apply() {
    // After the rename ran, the catalog holds the new text, names and hashes.
    let remote = vec![SchemaSnapshot::new("public").with_table(as_introspected(users_with_dependents("email"), "email"))];
    let local = vec![SchemaSnapshot::new("public").with_table(users_with_dependents("email"))];

    assert!(plan_changesets(&local, &remote, &mail_to_email(), &CompileOptions::default())
        .unwrap()
        .is_empty());
}

#[test]
fn test_column_rename_recreates_changed_check() {
    let remote = vec![SchemaSnapshot::new("public").with_table(as_introspected(users_with_dependents("mail"), "mail"))];
    let mut users = users_with_dependents("email");
    users.check_constraints = vec![CheckConstraintDefinition::new("users", "length(email) > 3")];
    let local = vec![SchemaSnapshot::new("public").with_table(users)];

    let changesets = plan_changesets(&local, &remote, &mail_to_email(), &CompileOptions::default()).unwrap();

    assert!(position(&changesets, DiffType::DropCheckConstraint, "users") < position(&changesets, DiffType::CreateCheckConstraint, "users"));
    assert_absent(&changesets, DiffType::RenameConstraint);
    assert_absent(&changesets, DiffType::DropIndex);
    assert_absent(&changesets, DiffType::DropTrigger);
}
