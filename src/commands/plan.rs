use crate::commands::{connect, load_desired};
use crate::compile::{Changeset, CompileOptions};
use crate::config::PgdeltaConfig;
use crate::db::introspect_schemas;
use crate::error::{PgdeltaError, Result};
use crate::output::{ChangeMarker, OutputHandler};
use crate::planner::plan_changesets;
use crate::rename::RenamePrompt;
use crate::schema::SchemaSnapshot;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub schemas: Vec<String>,
    pub changesets: Vec<Changeset>,
}

impl PlanResult {
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn statement_count(&self) -> usize {
        self.changesets.iter().map(|c| c.up.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PgdeltaError::Internal(format!("cannot serialize plan: {}", e)))
    }
}

/// Plan the changes that bring the database to the schema file's state.
pub async fn execute_plan(config: &PgdeltaConfig, prompt: &dyn RenamePrompt) -> Result<PlanResult> {
    let (local, schemas) = load_desired(config)?;
    let (client, _) = connect(config).await?;
    let remote = introspect_schemas(&client, &schemas).await?;
    build_plan(&local, &remote, schemas, config, prompt)
}

/// The database-free half of [`execute_plan`].
pub fn build_plan(
    local: &[SchemaSnapshot],
    remote: &[SchemaSnapshot],
    schemas: Vec<String>,
    config: &PgdeltaConfig,
    prompt: &dyn RenamePrompt,
) -> Result<PlanResult> {
    let options = CompileOptions {
        concurrent_indexes: config.concurrent_indexes(),
    };
    let changesets = plan_changesets(local, remote, prompt, &options)?;
    debug!(changesets = changesets.len(), "built plan");
    Ok(PlanResult { schemas, changesets })
}

pub fn print_plan_summary(plan: &PlanResult, out: &dyn OutputHandler, show_sql: bool) {
    out.heading(&format!("Plan for {}", plan.schemas.join(", ")));

    if plan.is_empty() {
        out.success("Database is up to date");
        return;
    }

    for changeset in &plan.changesets {
        out.item(
            ChangeMarker::for_type(changeset.diff_type),
            &format!("{} {}", changeset.diff_type, changeset.label()),
        );
        if show_sql {
            for statement in &changeset.up {
                out.sql(&statement.sql);
            }
        }
    }

    let non_transactional = plan.changesets.iter().filter(|c| !c.is_transactional()).count();
    if non_transactional > 0 {
        out.warning(&format!(
            "{} changeset(s) run outside a transaction (concurrent index builds or enum changes)",
            non_transactional
        ));
    }
    out.info(&format!(
        "{} changeset(s), {} statement(s)",
        plan.changesets.len(),
        plan.statement_count()
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{LibraryOutputHandler, OutputLevel};
    use crate::rename::NoRenames;
    use crate::schema::{ColumnDefinition, IndexDefinition, TableDefinition};

    fn books() -> TableDefinition {
        TableDefinition::new("books")
            .with_column(ColumnDefinition::new("id", "integer"))
            .with_column(ColumnDefinition::new("title", "text"))
            .with_primary_key(&["id"])
    }

    #[test]
    fn test_build_plan_and_summary() {
        let remote = vec![SchemaSnapshot::new("public").with_table(books())];
        let local = vec![SchemaSnapshot::new("public")
            .with_table(books().with_index(IndexDefinition::new("books", vec!["title".into()])))];

        let plan = build_plan(&local, &remote, vec!["public".into()], &PgdeltaConfig::default(), &NoRenames).unwrap();
        assert_eq!(plan.changesets.len(), 1);
        assert!(!plan.changesets[0].is_transactional());

        let out = LibraryOutputHandler::new();
        print_plan_summary(&plan, &out, true);
        let messages = out.get_messages();
        assert!(messages
            .iter()
            .any(|(level, text)| *level == OutputLevel::Item(ChangeMarker::Create) && text.starts_with("createIndex public.books")));
        assert!(messages.iter().any(|(level, text)| *level == OutputLevel::Sql && text.contains("CONCURRENTLY")));
        assert!(messages.iter().any(|(level, _)| *level == OutputLevel::Warning));
    }

    #[test]
    fn test_plan_respects_concurrent_index_setting() {
        let remote = vec![SchemaSnapshot::new("public").with_table(books())];
        let local = vec![SchemaSnapshot::new("public")
            .with_table(books().with_index(IndexDefinition::new("books", vec!["title".into()])))];
        let config = PgdeltaConfig {
            concurrent_indexes: Some(false),
            ..PgdeltaConfig::default()
        };

        let plan = build_plan(&local, &remote, vec!["public".into()], &config, &NoRenames).unwrap();
        assert!(plan.changesets[0].is_transactional());
    }

    #[test]
    fn test_empty_plan_summary_and_json() {
        let snapshot = vec![SchemaSnapshot::new("public").with_table(books())];
        let plan = build_plan(&snapshot, &snapshot, vec!["public".into()], &PgdeltaConfig::default(), &NoRenames).unwrap();
        assert!(plan.is_empty());

        let out = LibraryOutputHandler::new();
        print_plan_summary(&plan, &out, false);
        assert!(out.get_messages().contains(&(OutputLevel::Success, "Database is up to date".to_string())));

        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["schemas"][0], "public");
        assert_eq!(json["changesets"].as_array().unwrap().len(), 0);
    }
}
