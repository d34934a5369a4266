use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use schema_ledger::{
    ChangeId, Direction, DirectorySource, LedgerConfig, LedgerEngine, LedgerStore,
    SqliteExecutor,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};

#[derive(Parser)]
#[command(
    name = "schema-ledger",
    about = "Apply, track and reverse ordered schema changes",
    version
)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory of JSON change-record files
    #[arg(long, global = true)]
    changes: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show every known change and whether it is applied
    Status,

    /// List the changes a migration would run, without running them
    List {
        /// Direction to plan: "up" or "down"
        #[arg(long, default_value = "up")]
        direction: String,
    },

    /// Apply pending changes
    Up {
        /// Stop after this change id (inclusive)
        #[arg(long)]
        to: Option<String>,
    },

    /// Revert applied changes (one step by default)
    Down {
        /// Revert down to this change id (it stays applied)
        #[arg(long, conflicts_with_all = ["steps", "all"])]
        to: Option<String>,

        /// Number of changes to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,

        /// Revert every applied change
        #[arg(long)]
        all: bool,
    },
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Change")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Applied At")]
    applied_at: String,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Set up the tokio runtime
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = LedgerConfig::default();
    if let Some(db) = cli.db {
        config = config.with_db_path(db);
    }
    if let Some(changes) = cli.changes {
        config = config.with_definitions_dir(changes);
    }

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let source = DirectorySource::new(&config.definitions_dir);
    let executor = SqliteExecutor::connect(&config.database_url()).await?;
    let engine = LedgerEngine::new(source, executor);

    match cli.command {
        Command::Status => {
            let status = engine.status().await?;
            if status.is_empty() {
                println!("No change definitions in {}", config.definitions_dir.display());
                return Ok(());
            }
            let rows: Vec<StatusRow> = status
                .iter()
                .map(|s| StatusRow {
                    id: s.id.to_string(),
                    name: s.name.clone(),
                    applied_at: match s.applied_at {
                        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        None => "pending".to_string(),
                    },
                })
                .collect();
            println!("{}", Table::new(rows));

            let applied = status.iter().filter(|s| s.is_applied()).count();
            println!(
                "{} of {} change(s) applied",
                applied.to_string().green(),
                status.len()
            );
        }
        Command::List { direction } => {
            let direction: Direction = direction
                .parse()
                .map_err(|_| anyhow::anyhow!("direction must be \"up\" or \"down\""))?;
            let pending = engine.pending(direction, None).await?;
            if pending.is_empty() {
                println!("Nothing to do for {}", direction);
                return Ok(());
            }
            for record in &pending {
                println!("{}  {}", record.id.to_string().yellow(), record.name);
            }
        }
        Command::Up { to } => {
            let target = to.map(ChangeId::new).transpose()?;
            let applied = engine.migrate(Direction::Up, target.as_ref()).await?;
            println!("✅ {} change(s) applied", applied.len().to_string().green());
        }
        Command::Down { to, steps, all } => {
            let target = if all {
                None
            } else if let Some(to) = to {
                Some(ChangeId::new(to)?)
            } else {
                // Step back `steps` entries from the current position.
                let recent = engine.executor().recent(steps + 1).await?;
                if recent.len() <= steps {
                    None
                } else {
                    Some(recent[steps].change_id.clone())
                }
            };
            let reverted = engine.migrate(Direction::Down, target.as_ref()).await?;
            println!("✅ {} change(s) reverted", reverted.len().to_string().green());
        }
    }

    Ok(())
}
