//! Static priority bands and the total execution order.
//!
//! A diff's type fixes its place in the create/destroy lifecycle, so a band
//! per type is enough to order a whole plan without a per-object dependency
//! graph. Drops of dependents come before drops of what they depend on;
//! creates of dependents come after creates of what they depend on; renames
//! sit between the two halves.

use crate::diff::{Diff, DiffKind, DiffType};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Execution band of a diff; lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Band of the table-rename step; everything below it sees old table names.
    pub const TABLE_RENAME: Priority = Priority(900);

    pub fn of(kind: &DiffKind) -> Self {
        Self::for_type(kind.diff_type())
    }

    pub fn for_type(diff_type: DiffType) -> Self {
        let band = match diff_type {
            DiffType::CreateSchema => 0,
            DiffType::CreateExtension => 1,
            DiffType::CreateEnum => 2,
            DiffType::ChangeEnum => 3,

            DiffType::DropTrigger => 800,
            DiffType::DropIndex => 801,
            DiffType::DropForeignKey => 802,
            DiffType::DropUniqueConstraint => 803,
            DiffType::DropCheckConstraint => 804,

            DiffType::ChangeTable => 900,

            DiffType::DropColumnDefault => 1001,
            DiffType::DropPrimaryKey => 1002,
            DiffType::DropColumn => 1004,
            DiffType::DropTable => 1006,

            DiffType::CreateTable => 2001,
            DiffType::CreateColumn => 2002,

            DiffType::ChangeColumnName => 3000,
            DiffType::ChangeColumn => 3001,
            DiffType::ChangeColumnIdentity => 3002,
            DiffType::SetColumnDefault => 3003,
            DiffType::DropColumnNotNull => 3004,
            DiffType::SetColumnNotNull => 3005,

            DiffType::CreatePrimaryKey => 4001,
            DiffType::CreateUniqueConstraint => 4002,
            DiffType::CreateForeignKey => 4003,
            DiffType::CreateCheckConstraint => 4004,
            DiffType::CreateIndex => 4005,
            DiffType::CreateTrigger => 4006,

            DiffType::ChangeIndex => 5001,
            DiffType::RenameTrigger => 5002,
            DiffType::RenameConstraint => 5003,

            DiffType::DropEnum => 6001,
            DiffType::DropExtension => 6002,
            DiffType::DropSchema => 6003,
        };
        Priority(band)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Destructive types walk schemas in deletion order.
fn is_destructive(diff_type: DiffType) -> bool {
    matches!(
        diff_type,
        DiffType::DropTrigger
            | DiffType::DropIndex
            | DiffType::DropForeignKey
            | DiffType::DropUniqueConstraint
            | DiffType::DropCheckConstraint
            | DiffType::DropColumnDefault
            | DiffType::DropPrimaryKey
            | DiffType::DropColumn
            | DiffType::DropTable
            | DiffType::DropEnum
            | DiffType::DropExtension
            | DiffType::DropSchema
    )
}

/// Order diffs for sequential execution.
///
/// `schema_order` is the creation order from
/// [`SchemaGraph`](crate::analysis::SchemaGraph). Within a band, diffs are
/// ordered by schema (reversed for destructive bands), then table, then
/// object name, then the order they were produced in.
pub fn schedule(diffs: Vec<Diff>, schema_order: &[String]) -> Vec<Diff> {
    let rank: HashMap<&str, usize> = schema_order
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let schema_rank = |diff: &Diff| -> (usize, String) {
        let position = rank.get(diff.schema.as_str()).copied();
        let position = match position {
            Some(p) if is_destructive(diff.diff_type()) => schema_order.len() - 1 - p,
            Some(p) => p,
            None => schema_order.len(),
        };
        (position, diff.schema.clone())
    };

    let mut keyed: Vec<(Priority, (usize, String), usize, Diff)> = diffs
        .into_iter()
        .enumerate()
        .map(|(seq, diff)| (Priority::of(&diff.kind), schema_rank(&diff), seq, diff))
        .collect();

    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.3.table.cmp(&b.3.table))
            .then_with(|| a.3.object_name.cmp(&b.3.object_name))
            .then_with(|| a.2.cmp(&b.2))
    });

    keyed
        .into_iter()
        .map(|(priority, _, _, diff)| {
            trace!(priority = %priority, diff_type = %diff.diff_type(), object = %diff.label(), "scheduled");
            diff
        })
        .collect()
}
