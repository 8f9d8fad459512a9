//! Terminal confirmation of rename candidates.

use crate::error::{PgdeltaError, Result};
use crate::rename::{rename_candidates, RenameMap, RenamePrompt};
use crate::schema::SchemaSnapshot;
use console::{style, Term};
use std::collections::BTreeSet;

/// Asks on the terminal about every dropped/added pair of equal shape that
/// `inner` did not already resolve.
pub struct InteractiveRenames<P> {
    inner: P,
    term: Term,
}

impl<P: RenamePrompt> InteractiveRenames<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            term: Term::stderr(),
        }
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        let io_err = |e: std::io::Error| PgdeltaError::Internal(format!("terminal error: {}", e));
        self.term
            .write_str(&format!("{} {} ", question, style("[y/N/q]").dim()))
            .map_err(io_err)?;
        let answer = self.term.read_line().map_err(io_err)?;
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(true),
            "q" | "quit" => Err(PgdeltaError::Cancelled),
            _ => Ok(false),
        }
    }
}

impl<P: RenamePrompt> RenamePrompt for InteractiveRenames<P> {
    fn resolve(&self, local: &SchemaSnapshot, remote: &SchemaSnapshot) -> Result<RenameMap> {
        let mut map = self.inner.resolve(local, remote)?;
        let candidates = rename_candidates(local, remote);
        if candidates.is_empty() || !self.term.is_term() {
            return Ok(map);
        }

        let schema = &local.schema_name;
        let mut taken_from: BTreeSet<String> = map.tables.iter().map(|p| p.from.clone()).collect();
        let mut taken_to: BTreeSet<String> = map.tables.iter().map(|p| p.to.clone()).collect();
        for pair in candidates.tables {
            if taken_from.contains(&pair.from) || taken_to.contains(&pair.to) {
                continue;
            }
            let question = format!(
                "Was table {} renamed to {}?",
                style(format!("{}.{}", schema, pair.from)).cyan(),
                style(&pair.to).cyan()
            );
            if self.confirm(&question)? {
                taken_from.insert(pair.from.clone());
                taken_to.insert(pair.to.clone());
                map.tables.push(pair);
            }
        }

        for (table, pairs) in candidates.columns {
            let resolved = map.columns.get(&table).cloned().unwrap_or_default();
            let mut taken_from: BTreeSet<String> = resolved.iter().map(|p| p.from.clone()).collect();
            let mut taken_to: BTreeSet<String> = resolved.iter().map(|p| p.to.clone()).collect();
            for pair in pairs {
                if taken_from.contains(&pair.from) || taken_to.contains(&pair.to) {
                    continue;
                }
                let question = format!(
                    "Was column {} renamed to {}?",
                    style(format!("{}.{}.{}", schema, table, pair.from)).cyan(),
                    style(&pair.to).cyan()
                );
                if self.confirm(&question)? {
                    taken_from.insert(pair.from.clone());
                    taken_to.insert(pair.to.clone());
                    map = map.rename_column(&table, &pair.from, &pair.to);
                }
            }
        }

        Ok(map)
    }
}
