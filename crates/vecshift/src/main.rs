//! vecshift CLI
//!
//! Thin command dispatcher: loads a migration config and invokes the
//! migrator. All failures exit with code 1.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vecshift::checkpoint::CheckpointManager;
use vecshift::{get_progress, MigrationConfig, Migrator};

#[derive(Parser)]
#[command(name = "vecshift")]
#[command(version)]
#[command(about = "Migrate vector records between pg, oceanbase and milvus", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot full migration
    #[command(alias = "migrate")]
    MigrateOffline {
        /// Configuration file path
        config: PathBuf,
    },

    /// Run a full migration followed by continuous CDC sync
    MigrateOnline {
        /// Configuration file path
        config: PathBuf,
    },

    /// Show progress recorded in the checkpoint file
    Status {
        /// Configuration file path (for the checkpoint directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Delete the checkpoint so the next run starts from scratch
    Reset {
        /// Configuration file path (for the checkpoint directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::MigrateOffline { config } => migrate_offline(&config).await?,
        Commands::MigrateOnline { config } => migrate_online(&config).await?,
        Commands::Status { config } => show_status(config.as_deref())?,
        Commands::Reset { config } => reset(config.as_deref())?,
    }

    Ok(())
}

async fn migrate_offline(config_path: &Path) -> anyhow::Result<()> {
    info!("loading configuration from {}", config_path.display());
    let config = MigrationConfig::from_file(config_path)?;

    let mut migrator = Migrator::from_config(&config)?;
    let report = migrator.migrate_offline().await?;

    println!("Migration complete");
    println!("  Processed:  {}", report.total_processed);
    println!("  Failed:     {}", report.total_failed);
    println!("  Duration:   {:.2}s", report.duration_secs);
    println!("  Throughput: {:.0} records/sec", report.throughput());
    Ok(())
}

async fn migrate_online(config_path: &Path) -> anyhow::Result<()> {
    info!("loading configuration from {}", config_path.display());
    let config = MigrationConfig::from_file(config_path)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, requesting shutdown");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut migrator = Migrator::from_config(&config)?;
    let report = migrator.migrate_online(shutdown_rx).await?;

    println!("Online migration stopped");
    println!("  Processed: {}", report.total_processed);
    println!("  Failed:    {}", report.total_failed);
    Ok(())
}

fn checkpoint_manager(config_path: Option<&Path>) -> anyhow::Result<CheckpointManager> {
    let dir = match config_path {
        Some(path) => MigrationConfig::from_file(path)?.checkpoint_dir,
        None => PathBuf::from("./checkpoints"),
    };
    Ok(CheckpointManager::new(dir))
}

fn show_status(config_path: Option<&Path>) -> anyhow::Result<()> {
    let manager = checkpoint_manager(config_path)?;
    match manager.load()? {
        Some(checkpoint) => {
            let progress = get_progress(&checkpoint);
            println!("Phase:     {:?}", progress.phase);
            println!("Records:   {}", progress.total_records);
            println!("Processed: {}", progress.total_processed);
            println!("Failed:    {}", progress.total_failed);
            println!("Progress:  {:.1}%", progress.percentage);
            if let Some(watermark) = checkpoint.last_timestamp {
                println!("Watermark: {watermark}");
            }
        }
        None => println!("No checkpoint found at {}", manager.path().display()),
    }
    Ok(())
}

fn reset(config_path: Option<&Path>) -> anyhow::Result<()> {
    let manager = checkpoint_manager(config_path)?;
    manager.clear()?;
    println!("Checkpoint cleared: {}", manager.path().display());
    Ok(())
}
