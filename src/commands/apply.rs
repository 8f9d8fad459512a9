use crate::commands::{build_plan, connect, load_desired, PlanResult};
use crate::config::PgdeltaConfig;
use crate::db::{apply_changesets, introspect_schemas, ApplyReport, ExecutorOptions};
use crate::error::Result;
use crate::logging::format_duration;
use crate::output::{ChangeMarker, OutputHandler};
use crate::rename::RenamePrompt;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub plan: PlanResult,
    pub report: ApplyReport,
    pub elapsed: Duration,
}

/// Plan against the live database and apply the plan in the same session.
///
/// `confirm` sees the plan before anything runs; returning `false` cancels.
pub async fn execute_apply(
    config: &PgdeltaConfig,
    prompt: &dyn RenamePrompt,
    confirm: impl FnOnce(&PlanResult) -> bool,
) -> Result<Option<ApplyResult>> {
    let (local, schemas) = load_desired(config)?;
    let (mut client, database) = connect(config).await?;
    let remote = introspect_schemas(&client, &schemas).await?;
    let plan = build_plan(&local, &remote, schemas, config, prompt)?;

    if plan.is_empty() {
        info!("nothing to apply");
        return Ok(Some(ApplyResult {
            plan,
            report: ApplyReport::default(),
            elapsed: Duration::ZERO,
        }));
    }
    if !confirm(&plan) {
        return Ok(None);
    }

    let options = ExecutorOptions {
        database_identity: database.identity(),
        lock_timeout: Duration::from_secs(config.lock_timeout_secs()),
    };
    let started = Instant::now();
    let report = apply_changesets(&mut client, &plan.changesets, &options).await?;
    let elapsed = started.elapsed();
    info!(
        changesets = report.changesets,
        statements = report.statements,
        elapsed = %format_duration(elapsed),
        "applied plan"
    );

    Ok(Some(ApplyResult { plan, report, elapsed }))
}

pub fn print_apply_summary(result: &ApplyResult, out: &dyn OutputHandler) {
    if result.plan.is_empty() {
        out.success("Database is up to date");
        return;
    }

    out.heading("Applied");
    for changeset in &result.plan.changesets {
        out.item(
            ChangeMarker::for_type(changeset.diff_type),
            &format!("{} {}", changeset.diff_type, changeset.label()),
        );
    }
    out.success(&format!(
        "Applied {} changeset(s), {} statement(s) in {}",
        result.report.changesets,
        result.report.statements,
        format_duration(result.elapsed)
    ));
}
