use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use feedmirror::config::Config;
use feedmirror::model::{Entry, Subscription};
use feedmirror::storage::{Database, MaterializeReport, SyncError};

/// Get the config directory path (~/.config/feedmirror/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmirror"))
}

/// Read a JSON array of typed objects as produced by the API client.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("'{}' is not a valid JSON array of objects", path.display()))
}

fn print_report(label: &str, report: &MaterializeReport) {
    println!(
        "{label}: {} writes ({} feeds, {} categories, {} entries, {} tags, {} files) in {} commit(s)",
        report.writes(),
        report.feeds,
        report.categories,
        report.entries,
        report.tags,
        report.files,
        report.commits
    );
    for rejection in &report.rejected {
        eprintln!("  skipped: {rejection}");
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "feedmirror",
    about = "Materialize RSS aggregator batches into a local SQLite store"
)]
struct Args {
    /// Config file (default: ~/.config/feedmirror/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides the config file
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Drop and recreate every table, index and view
    #[arg(long)]
    reset_schema: bool,

    /// JSON array of subscriptions to materialize
    #[arg(long, value_name = "FILE")]
    subscriptions: Option<PathBuf>,

    /// JSON array of entries to materialize
    #[arg(long, value_name = "FILE")]
    entries: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.database_path(&config_dir));
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open_with(db_path_str, config.store_options()).await {
        Ok(db) => db,
        Err(SyncError::BackendUnavailable(e)) => {
            eprintln!("Error: the feed store is unavailable ({e}). Is another sync running?");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if args.reset_schema {
        db.reset_schema().await.context("Failed to reset schema")?;
        db.create_schema().await.context("Failed to create schema")?;
        println!("Schema reset: {}", db_path.display());
    }

    if let Some(path) = &args.subscriptions {
        let subscriptions: Vec<Subscription> = read_json(path)?;
        let report = db
            .materialize_subscriptions(&subscriptions)
            .await
            .context("Failed to materialize subscriptions")?;
        print_report("Subscriptions", &report);
    }

    if let Some(path) = &args.entries {
        let entries: Vec<Entry> = read_json(path)?;
        let report = db
            .materialize_entries(&entries)
            .await
            .context("Failed to materialize entries")?;
        print_report("Entries", &report);
    }

    Ok(())
}
