//! backuptool CLI - snapshot, restore, prune and verify directory backups

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backuptool::ops::{check, list, ls, prune, restore, snapshot_with_options, SnapshotOptions};
use backuptool::{SnapshotId, Store};

#[derive(Parser)]
#[command(name = "backuptool")]
#[command(about = "content-addressed directory snapshots")]
#[command(version)]
struct Cli {
    /// backup store location
    #[arg(long, default_value = "backups.db", env = "BACKUPTOOL_DB")]
    db_path: PathBuf,

    /// write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// capture a directory as a new snapshot
    Snapshot {
        /// directory to capture
        #[arg(long)]
        target_directory: PathBuf,

        /// skip files larger than this many bytes
        #[arg(long)]
        max_file_size: Option<u64>,
    },

    /// list snapshots with their sizes
    List,

    /// restore a snapshot into a directory
    Restore {
        /// snapshot to restore
        #[arg(long)]
        snapshot_number: SnapshotId,

        /// destination directory, created if absent
        #[arg(long)]
        output_directory: PathBuf,
    },

    /// remove a snapshot and reclaim unshared content
    Prune {
        /// snapshot to remove
        #[arg(long)]
        snapshot: SnapshotId,
    },

    /// verify stored content against its fingerprints
    Check,

    /// list the files of a snapshot
    Ls {
        /// snapshot to list
        #[arg(long)]
        snapshot: SnapshotId,
    },

    /// show or change the store configuration
    Config {
        /// skip files larger than this many bytes in future snapshots
        #[arg(long, conflicts_with = "no_max_file_size")]
        max_file_size: Option<u64>,

        /// remove the file size limit
        #[arg(long)]
        no_max_file_size: bool,

        /// add a glob pattern of relative paths to leave out (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// drop all exclude patterns before adding new ones
        #[arg(long)]
        clear_excludes: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> backuptool::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| backuptool::Error::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> backuptool::Result<ExitCode> {
    match cli.command {
        Commands::Snapshot {
            target_directory,
            max_file_size,
        } => {
            let mut store = Store::open_or_init(&cli.db_path)?;
            let opts = SnapshotOptions { max_file_size };
            let (id, stats) = snapshot_with_options(&mut store, &target_directory, &opts)?;

            println!("Snapshot {} created successfully", id);
            if stats.files_skipped > 0 {
                println!("skipped {} files", stats.files_skipped);
            }
        }

        Commands::List => {
            let store = Store::open_or_init(&cli.db_path)?;
            let listing = list(&store)?;

            if listing.snapshots.is_empty() {
                println!("No snapshots found");
                return Ok(ExitCode::SUCCESS);
            }

            println!(
                "{:<10} {:<20} {:>12} {:>14}",
                "SNAPSHOT", "TIMESTAMP", "SIZE", "DISTINCT_SIZE"
            );
            for summary in &listing.snapshots {
                println!(
                    "{:<10} {:<20} {:>12} {:>14}",
                    summary.snapshot.id,
                    format_timestamp(&summary.snapshot.timestamp),
                    format_kb(summary.size),
                    format_kb(summary.distinct_size)
                );
            }
            println!("{:<10} {:<20} {:>12}", "total", "", format_kb(listing.total_size));
        }

        Commands::Restore {
            snapshot_number,
            output_directory,
        } => {
            let store = Store::open(&cli.db_path)?;
            restore(&store, snapshot_number, &output_directory)?;
            println!(
                "Snapshot {} restored to {}",
                snapshot_number,
                output_directory.display()
            );
        }

        Commands::Prune { snapshot } => {
            let mut store = Store::open(&cli.db_path)?;
            let stats = prune(&mut store, snapshot)?;
            println!("Snapshot {} pruned successfully", snapshot);
            println!(
                "removed {} files, {} contents, freed {}",
                stats.files_removed,
                stats.contents_removed,
                format_kb(stats.bytes_freed)
            );
        }

        Commands::Check => {
            let store = Store::open_or_init(&cli.db_path)?;
            let report = check(&store)?;

            if report.is_ok() {
                println!("Database integrity check passed");
                println!("contents checked: {}", report.contents_checked);
                return Ok(ExitCode::SUCCESS);
            }

            println!("Database integrity check FAILED");
            for item in &report.corrupt {
                println!("\nCorrupted content detected");
                println!("  stored hash:     {}", item.stored);
                println!("  calculated hash: {}", item.calculated);
                for file in &item.affected {
                    println!(
                        "  snapshot {} ({}): {}",
                        file.snapshot_id,
                        format_timestamp(&file.timestamp),
                        file.path
                    );
                }
            }
            for item in &report.missing {
                println!("\nMissing content detected");
                println!("  hash: {}", item.hash);
                for file in &item.affected {
                    println!(
                        "  snapshot {} ({}): {}",
                        file.snapshot_id,
                        format_timestamp(&file.timestamp),
                        file.path
                    );
                }
            }
            return Ok(ExitCode::FAILURE);
        }

        Commands::Ls { snapshot } => {
            let store = Store::open(&cli.db_path)?;
            for entry in ls(&store, snapshot)? {
                println!("{}", entry);
            }
        }

        Commands::Config {
            max_file_size,
            no_max_file_size,
            exclude,
            clear_excludes,
        } => {
            let mut store = Store::open_or_init(&cli.db_path)?;
            let changed = max_file_size.is_some()
                || no_max_file_size
                || clear_excludes
                || !exclude.is_empty();

            let config = store.config_mut();
            if no_max_file_size {
                config.max_file_size = None;
            }
            if max_file_size.is_some() {
                config.max_file_size = max_file_size;
            }
            if clear_excludes {
                config.exclude.clear();
            }
            config.exclude.extend(exclude);

            if changed {
                store.save_config()?;
            }

            let config = store.config();
            match config.max_file_size {
                Some(limit) => println!("max_file_size: {} bytes", limit),
                None => println!("max_file_size: none"),
            }
            println!("exclude: {}", config.exclude.join(", "));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_kb(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}
