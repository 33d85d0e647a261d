//! # seed-express
//!
//! Command-line front end for the sync engine.
//!
//! ```text
//! seed-express sync --table colors --file seeds/colors.json [--truncate] [--force]
//! seed-express status [--table colors]
//! seed-express invalidate --table palettes
//! ```
//!
//! `sync` prints the run report as JSON and exits with status 1 unless the
//! result is `ok` or `skipped`.

use std::path::PathBuf;
use std::process;

use chrono::Duration;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use seed_db::Database;
use seed_sync::{
    EntityDescriptor, FileSource, SeedConfig, SourceFormat, SyncEngine, SyncError, SyncResult,
};

#[derive(Parser)]
#[command(author, version, about = "Incremental seed data sync", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync one table from a seed file
    Sync {
        #[arg(short, long)]
        table: String,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, help = "json or jsonl; inferred from the extension if omitted")]
        format: Option<SourceFormat>,
        #[arg(long, help = "Empty the table and its digests first")]
        truncate: bool,
        #[arg(long, help = "Run even if the file is unchanged")]
        force: bool,
        #[arg(long, help = "Replace nulls with the configured NVL values")]
        nvl: bool,
        #[arg(long, allow_hyphen_values = true)]
        datetime_offset_secs: Option<i64>,
        #[arg(long, help = "Parent table to invalidate")]
        parent: Option<String>,
    },
    /// Show stored table states
    Status {
        #[arg(short, long)]
        table: Option<String>,
    },
    /// Mark a table stale so its next sync re-checks every row
    Invalidate {
        #[arg(short, long)]
        table: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,seed=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match SeedConfig::load(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Sync {
            table,
            file,
            format,
            truncate,
            force,
            nvl,
            datetime_offset_secs,
            parent,
        } => {
            let args = SyncArgs {
                table,
                file,
                format,
                truncate,
                force,
                nvl,
                datetime_offset_secs,
                parent,
            };
            run_sync(&config, args).await
        }
        Commands::Status { table } => show_status(&config, table.as_deref()).await.map(|_| true),
        Commands::Invalidate { table } => invalidate(&config, &table).await.map(|_| true),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

struct SyncArgs {
    table: String,
    file: PathBuf,
    format: Option<SourceFormat>,
    truncate: bool,
    force: bool,
    nvl: bool,
    datetime_offset_secs: Option<i64>,
    parent: Option<String>,
}

/// Runs a sync and prints its report. Returns whether the run succeeded.
async fn run_sync(config: &SeedConfig, args: SyncArgs) -> SyncResult<bool> {
    let mut registry = config.registry();
    if !registry.contains(&args.table) {
        debug!(table = %args.table, "Table not in config, syncing with schema rules only");
        registry.register(EntityDescriptor::new(&args.table));
    }

    let mut options = config
        .sync_options()
        .truncate(args.truncate)
        .force_update(args.force);
    if args.nvl {
        options = options.nvl(true);
    }
    if let Some(secs) = args.datetime_offset_secs {
        options = options.datetime_offset(Duration::seconds(secs));
    }
    if let Some(parent) = args.parent {
        options = options.parent_table(parent);
    }

    let mut source = FileSource::new(args.file);
    if let Some(format) = args.format {
        source = source.with_format(format);
    }

    let db = Database::new(config.db_config()).await?;
    let engine = SyncEngine::new(db.clone(), registry);
    let report = engine.sync(&args.table, &source, &options).await;
    db.close().await;

    let report = report?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_success())
}

async fn show_status(config: &SeedConfig, table: Option<&str>) -> SyncResult<()> {
    let db = Database::new(config.db_config()).await?;
    let states = db.table_states();

    let listing = match table {
        Some(name) => {
            let state = states
                .get(name)
                .await?
                .ok_or_else(|| SyncError::UnknownTable(name.to_string()))?;
            serde_json::to_string_pretty(&state)?
        }
        None => serde_json::to_string_pretty(&states.list().await?)?,
    };
    db.close().await;

    println!("{}", listing);
    Ok(())
}

async fn invalidate(config: &SeedConfig, table: &str) -> SyncResult<()> {
    let db = Database::new(config.db_config()).await?;
    db.table_states().invalidate(table).await?;
    db.close().await;

    eprintln!("Invalidated '{}'", table);
    Ok(())
}
