use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use bgate::{DedupeResult, EngineConfig};

#[derive(Parser)]
#[command(name = "bgate")]
#[command(author, version, about = "Content-addressed file deduplication engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory, classifying every file as unique, duplicate, or skipped.
    Scan {
        /// Directory to scan.
        path: PathBuf,
        /// Path to the index database.
        #[arg(long, default_value = "dedupe.db")]
        db: PathBuf,
        /// Relocate unique files into this content-addressed store.
        #[arg(long)]
        into: Option<PathBuf>,
        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,
        /// Classify without registering or relocating anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Reconcile orphaned files and incomplete moves left by an unclean shutdown.
    Recover {
        #[arg(long, default_value = "dedupe.db")]
        db: PathBuf,
    },
    /// Print index summary statistics.
    Stats {
        #[arg(long, default_value = "dedupe.db")]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            path,
            db,
            into,
            recursive,
            dry_run,
        } => scan(path, db, into, recursive, dry_run),
        Commands::Recover { db } => recover(db),
        Commands::Stats { db } => stats(db),
    }
}

fn scan(path: PathBuf, db: PathBuf, into: Option<PathBuf>, recursive: bool, dry_run: bool) -> Result<()> {
    let mut config = EngineConfig::new(db).with_recursive(recursive);
    if let Some(root) = into.filter(|_| !dry_run) {
        std::fs::create_dir_all(&root)?;
        config = config.with_content_store(root);
    }

    info!("scanning {}", path.display());
    let engine = bgate::Engine::open(config)?;

    let results = if path.is_dir() {
        engine.scan_directory(&path)
    } else {
        vec![engine.process_path(&path)]
    };

    let mut unique = 0;
    let mut duplicate = 0;
    let mut skipped = 0;
    for result in &results {
        match result.result {
            DedupeResult::Unique => unique += 1,
            DedupeResult::Duplicate => duplicate += 1,
            DedupeResult::Skipped => skipped += 1,
        }
    }

    println!("Unique:    {unique}");
    println!("Duplicate: {duplicate}");
    println!("Skipped:   {skipped}");

    Ok(())
}

fn recover(db: PathBuf) -> Result<()> {
    let config = EngineConfig::new(db);
    let engine = bgate::Engine::open(config)?;
    let summary = engine.recover_orphans()?;
    println!("Emergency orphans imported: {}", summary.emergency_orphans_imported);
    println!("Journal entries reconciled: {}", summary.journal_entries_reconciled);
    println!("Orphans recovered:          {}", summary.orphans_recovered);
    Ok(())
}

fn stats(db: PathBuf) -> Result<()> {
    let config = EngineConfig::new(db);
    let engine = bgate::Engine::open(config)?;
    let stats = engine.stats()?;
    println!("Unique sizes:    {}", stats.unique_sizes);
    println!("Fringe entries:  {}", stats.fringe_entries);
    println!("Full entries:    {}", stats.full_entries);
    println!("Schema version:  {}", stats.schema_version);
    println!("Orphan count:    {}", stats.orphan_count);
    println!("Pending journal: {}", stats.pending_journal);
    Ok(())
}
