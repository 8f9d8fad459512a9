use crate::commands::{execute_plan, PlanResult};
use crate::config::PgdeltaConfig;
use crate::error::Result;
use crate::migration::{render_migration, write_migration};
use crate::rename::RenamePrompt;
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub plan: PlanResult,
    /// `None` when the plan was empty and nothing was written.
    pub files: Option<(PathBuf, PathBuf)>,
}

/// Plan against the live database and write the plan as a migration file pair.
pub async fn execute_generate(
    config: &PgdeltaConfig,
    prompt: &dyn RenamePrompt,
    name: &str,
) -> Result<GenerateResult> {
    let plan = execute_plan(config, prompt).await?;
    if plan.is_empty() {
        info!("no changes, no migration written");
        return Ok(GenerateResult { plan, files: None });
    }

    let migration = render_migration(&plan.changesets, name, Utc::now());
    let files = write_migration(&config.migrations_dir(), &migration)?;
    Ok(GenerateResult {
        plan,
        files: Some(files),
    })
}
