use pgdelta::cli::{Cli, Commands, Side, TargetArgs};
use pgdelta::commands::prompt::InteractiveRenames;
use pgdelta::commands::snapshot::snapshots_to_json;
use pgdelta::commands::{
    default_prompt, execute_apply, execute_generate, execute_plan, execute_snapshot, print_apply_summary,
    print_plan_summary, SnapshotSource,
};
use pgdelta::error::{format_error_chain, suggest_fix};
use pgdelta::output::{CliOutputHandler, OutputHandler};
use pgdelta::rename::RenamePrompt;
use pgdelta::{logging, PgdeltaConfig, PgdeltaError, Result};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let out = CliOutputHandler;
    if let Err(err) = run(cli, &out).await {
        tracing::debug!(error = ?err, "command failed");
        out.error(&format_error_chain(&err));
        if let Some(suggestion) = suggest_fix(&err) {
            out.info(&suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(target: TargetArgs, migrations_dir: Option<PathBuf>) -> Result<PgdeltaConfig> {
    let config_file = PgdeltaConfig::load_from_file()?;
    Ok(PgdeltaConfig::merge_with_cli(
        config_file,
        target.connection_string,
        target.schema_file,
        migrations_dir,
        target.schemas,
    ))
}

fn prompt_for(config: &PgdeltaConfig, interactive: bool) -> Box<dyn RenamePrompt> {
    if interactive {
        Box::new(InteractiveRenames::new(default_prompt(config)))
    } else {
        Box::new(default_prompt(config))
    }
}

async fn run(cli: Cli, out: &dyn OutputHandler) -> Result<()> {
    match cli.command {
        Commands::Init => {
            let cwd = std::env::current_dir()?;
            let path = PgdeltaConfig::write_sample_config(&cwd)?;
            out.success(&format!("Wrote {}", path.display()));
            out.info("Rename it to pgdelta.toml and fill in your connection string");
        }

        Commands::Plan { target, json, sql, interactive } => {
            let config = load_config(target, None)?;
            let prompt = prompt_for(&config, interactive);
            let plan = execute_plan(&config, prompt.as_ref()).await?;
            if json {
                println!("{}", plan.to_json()?);
            } else {
                print_plan_summary(&plan, out, sql);
            }
        }

        Commands::Apply { target, interactive } => {
            let config = load_config(target, None)?;
            let prompt = prompt_for(&config, interactive);
            let result = execute_apply(&config, prompt.as_ref(), |plan| {
                if !interactive {
                    return true;
                }
                print_plan_summary(plan, out, true);
                console::Term::stderr()
                    .write_str("Apply these changes? [y/N] ")
                    .and_then(|_| console::Term::stderr().read_line())
                    .map(|answer| matches!(answer.trim(), "y" | "Y" | "yes"))
                    .unwrap_or(false)
            })
            .await?;

            match result {
                Some(result) => print_apply_summary(&result, out),
                None => return Err(PgdeltaError::Cancelled),
            }
        }

        Commands::Generate { name, target, migrations_dir, interactive } => {
            let config = load_config(target, migrations_dir)?;
            let prompt = prompt_for(&config, interactive);
            let result = execute_generate(&config, prompt.as_ref(), &name).await?;
            match result.files {
                Some((up, down)) => {
                    out.success(&format!("Wrote {}", up.display()));
                    out.success(&format!("Wrote {}", down.display()));
                }
                None => out.success("Database is up to date, no migration written"),
            }
        }

        Commands::Snapshot { target, from } => {
            let config = load_config(target, None)?;
            let source = match from {
                Side::Local => SnapshotSource::Local,
                Side::Remote => SnapshotSource::Remote,
            };
            let snapshots = execute_snapshot(&config, source).await?;
            println!("{}", snapshots_to_json(&snapshots)?);
        }
    }

    Ok(())
}
