use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use pole_migrate::config::{MigrationConfig, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_EVERY};
use pole_migrate::database_ops::{Db, PgTargetStore};
use pole_migrate::logging::{init_tracing, DEFAULT_FILTER};
use pole_migrate::source::ExportDirSource;
use pole_migrate::util::env;
use pole_migrate::run_migration;

#[derive(Parser, Debug)]
#[command(
    name = "pole_migrate",
    version,
    about = "Migrate legacy pole/drop documents into the relational store"
)]
struct Cli {
    /// Run every phase without writing to the target store
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Only migrate records belonging to this project id
    #[arg(long)]
    project: Option<String>,
    /// Directory holding one `<collection>.ndjson` or `<collection>.json` per collection
    #[arg(long, env = "LEGACY_EXPORT_DIR", default_value = "legacy-export")]
    source_dir: PathBuf,
    /// Target connection string (defaults to NEON_DATABASE_URL / DATABASE_URL / DB_URL)
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long, env = "MIGRATE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    /// Records per chunk when throttling
    #[arg(long, env = "MIGRATE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Pause between chunks in milliseconds; 0 disables throttling
    #[arg(long, env = "MIGRATE_CHUNK_PAUSE_MS", default_value_t = 0)]
    chunk_pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let database_url = match cli.database_url {
        Some(url) => url,
        None => env::db_url().context("resolving target database url")?,
    };
    info!(url = %env::redact_url(&database_url), "target store");
    let db = Db::connect_lazy(&database_url, cli.max_connections)
        .context("configuring target connection pool")?;
    let store = PgTargetStore::new(db);
    let source = ExportDirSource::new(cli.source_dir.clone());

    let mut config = MigrationConfig::default()
        .dry_run(cli.dry_run)
        .project(cli.project)
        .chunking(cli.chunk_size, cli.chunk_pause_ms);
    config.progress_every = env::env_parse("MIGRATE_PROGRESS_EVERY", DEFAULT_PROGRESS_EVERY);

    match run_migration(&source, &store, config).await {
        Ok(report) => {
            println!("{}", report.render());
            Ok(())
        }
        Err(aborted) => {
            println!("{}", aborted.report.render());
            error!(error = %aborted.source, "migration aborted");
            Err(aborted.into())
        }
    }
}
