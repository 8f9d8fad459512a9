//! Runs compiled changesets against a live database.
//!
//! A changeset whose statements may all run in a transaction is applied in
//! one; a changeset containing `CONCURRENTLY` statements runs statement by
//! statement in autocommit. A failed statement is never retried: its cleanup
//! (if any) runs, then the original error is returned.

use crate::compile::{Changeset, Statement};
use crate::db::locks::{AdvisoryLockError, AdvisoryLockManager};
use crate::error::{PgdeltaError, Result};
use crate::{log_changeset, log_error, log_statement_error};
use std::time::Duration;
use tokio_postgres::{Client, GenericClient};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// `host:port/database`, keys the advisory lock
    pub database_identity: String,
    pub lock_timeout: Duration,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub changesets: usize,
    pub statements: usize,
}

/// Apply every changeset's `up` statements in order, under the advisory lock.
pub async fn apply_changesets(
    client: &mut Client,
    changesets: &[Changeset],
    options: &ExecutorOptions,
) -> Result<ApplyReport> {
    let mut lock = AdvisoryLockManager::new(&options.database_identity);
    lock.acquire_lock(client, options.lock_timeout).await?;

    let result = apply_up(client, changesets).await;

    let released = lock.release_lock(client).await;
    finish(result, released)
}

/// A statement failure outranks a failed unlock; the unlock error is only logged then.
fn finish(result: Result<ApplyReport>, released: std::result::Result<(), AdvisoryLockError>) -> Result<ApplyReport> {
    match (result, released) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(lock_err)) => Err(lock_err.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(lock_err)) => {
            let lock_err = PgdeltaError::from(lock_err);
            log_error!(lock_err, phase = "release_lock");
            Err(e)
        }
    }
}

async fn apply_up(client: &mut Client, changesets: &[Changeset]) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    for changeset in changesets {
        log_changeset!(changeset, "apply");
        report.statements += run_statements(client, changeset, &changeset.up).await?;
        report.changesets += 1;
    }
    Ok(report)
}

/// Undo `changesets` by running their `down` statements, last changeset first.
pub async fn rollback_changesets(
    client: &mut Client,
    changesets: &[Changeset],
    options: &ExecutorOptions,
) -> Result<ApplyReport> {
    let mut lock = AdvisoryLockManager::new(&options.database_identity);
    lock.acquire_lock(client, options.lock_timeout).await?;

    let result = apply_down(client, changesets).await;

    let released = lock.release_lock(client).await;
    finish(result, released)
}

async fn apply_down(client: &mut Client, changesets: &[Changeset]) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    for changeset in changesets.iter().rev() {
        if changeset.down.is_empty() {
            warn!(changeset = %changeset.label(), diff_type = %changeset.diff_type, "no inverse statements");
            continue;
        }
        log_changeset!(changeset, "rollback");
        report.statements += run_statements(client, changeset, &changeset.down).await?;
        report.changesets += 1;
    }
    Ok(report)
}

async fn run_statements(client: &mut Client, changeset: &Changeset, statements: &[Statement]) -> Result<usize> {
    if statements.iter().all(|s| s.transactional) {
        let transaction = client.transaction().await?;
        for (index, statement) in statements.iter().enumerate() {
            execute(&transaction, changeset, index, statement).await?;
        }
        transaction.commit().await?;
    } else {
        for (index, statement) in statements.iter().enumerate() {
            execute(&*client, changeset, index, statement).await?;
        }
    }
    Ok(statements.len())
}

async fn execute<C: GenericClient>(
    client: &C,
    changeset: &Changeset,
    index: usize,
    statement: &Statement,
) -> Result<()> {
    debug!(changeset = %changeset.label(), statement = index, sql = %statement.sql, "executing");
    match client.batch_execute(&statement.sql).await {
        Ok(()) => Ok(()),
        Err(e) => {
            log_statement_error!(e, changeset, index);
            if let Some(cleanup) = &statement.cleanup {
                warn!(cleanup = %cleanup, "running cleanup for failed statement");
                if let Err(cleanup_err) = client.batch_execute(cleanup).await {
                    warn!(error = %cleanup_err, "cleanup failed");
                }
            }
            Err(PgdeltaError::StatementFailed {
                changeset: changeset.label(),
                statement: index,
                message: e.to_string(),
                source: e,
            })
        }
    }
}
