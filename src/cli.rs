use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(name = "pgdelta")]
#[command(about = "Declarative PostgreSQL schema migrations")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity level (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that talks to a database.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// PostgreSQL connection string
    #[arg(long)]
    pub connection_string: Option<String>,

    /// Declarative schema file
    #[arg(long)]
    pub schema_file: Option<PathBuf>,

    /// Schema to manage (repeatable); defaults to the schemas in the schema file
    #[arg(long = "schema")]
    pub schemas: Vec<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Generate a sample configuration file
    Init,

    /// Show the changes needed to reach the declared schema
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Print the changesets as JSON
        #[arg(long)]
        json: bool,

        /// Print the SQL of every changeset
        #[arg(long)]
        sql: bool,

        /// Confirm rename candidates on the terminal
        #[arg(long)]
        interactive: bool,
    },

    /// Apply the changes to the database
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        /// Confirm rename candidates and the plan on the terminal
        #[arg(long)]
        interactive: bool,
    },

    /// Write the changes as an up/down migration file pair
    Generate {
        /// Migration name, used in the file names
        name: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Directory the migration files are written to
        #[arg(long)]
        migrations_dir: Option<PathBuf>,

        /// Confirm rename candidates on the terminal
        #[arg(long)]
        interactive: bool,
    },

    /// Print a schema snapshot as JSON
    Snapshot {
        #[command(flatten)]
        target: TargetArgs,

        /// Which side to snapshot
        #[arg(long, value_enum, default_value_t = Side::Remote)]
        from: Side,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
