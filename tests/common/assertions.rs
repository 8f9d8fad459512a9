use pgdelta::{Changeset, DiffType};

pub fn types(changesets: &[Changeset]) -> Vec<DiffType> {
    changesets.iter().map(|c| c.diff_type).collect()
}

/// Assert the exact sequence of changeset types
pub fn assert_types(changesets: &[Changeset], expected: &[DiffType]) {
    assert_eq!(
        types(changesets),
        expected,
        "unexpected changeset sequence: {:#?}",
        changesets.iter().map(Changeset::label).collect::<Vec<_>>()
    );
}

/// Position of the first changeset of `diff_type` on `table`
pub fn position(changesets: &[Changeset], diff_type: DiffType, table: &str) -> usize {
    changesets
        .iter()
        .position(|c| c.diff_type == diff_type && c.table.as_deref() == Some(table))
        .unwrap_or_else(|| panic!("no {} changeset for table {}", diff_type, table))
}

/// Assert no changeset of `diff_type` exists
pub fn assert_absent(changesets: &[Changeset], diff_type: DiffType) {
    assert!(
        changesets.iter().all(|c| c.diff_type != diff_type),
        "expected no {} changeset, found {:?}",
        diff_type,
        changesets
            .iter()
            .filter(|c| c.diff_type == diff_type)
            .map(Changeset::label)
            .collect::<Vec<_>>()
    );
}

pub fn up_sql(changeset: &Changeset) -> Vec<&str> {
    changeset.up.iter().map(|s| s.sql.as_str()).collect()
}

pub fn down_sql(changeset: &Changeset) -> Vec<&str> {
    changeset.down.iter().map(|s| s.sql.as_str()).collect()
}
