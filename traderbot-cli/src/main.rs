//! Traderbot CLI: download, build and cache management commands.
//!
//! Commands:
//! - `download`: fetch raw records for every configured source into the cache
//! - `build`: run the full pipeline and write the dataset artifacts
//! - `cache status`: report cached entries, ranges and sizes
//! - `cache clean`: remove entries not refreshed recently

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use traderbot_core::data::{download_all, CollectorSet, LogProgress, RawCache};
use traderbot_core::export::{
    write_dataset_csv, write_split_csvs, write_table_parquet, DatasetManifest,
};
use traderbot_core::{Pipeline, PipelineConfig, RunOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "traderbot",
    about = "Traderbot CLI: crypto market data pipeline"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect raw records for every configured source and cache them.
    Download {
        /// Path to the pipeline TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Re-fetch even if the cache covers the range.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Build the feature dataset.
    Build {
        /// Path to the pipeline TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Offline mode: read the cache only, no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Replace every source with a seeded random walk.
        #[arg(long, default_value_t = false, conflicts_with = "offline")]
        synthetic: bool,

        /// Re-fetch even if the cache covers the range.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Only the most recent N complete intervals (live mode).
        #[arg(long)]
        live: Option<u32>,

        /// Output directory for dataset.csv, the train/valid/test CSVs,
        /// features.parquet and manifest.json.
        #[arg(long, default_value = "out")]
        out: PathBuf,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached entries with their ranges and sizes.
    Status {
        /// Cache directory.
        #[arg(long, default_value = "data/cache")]
        cache_dir: PathBuf,
    },
    /// Remove entries cached more than the given number of days ago.
    Clean {
        /// Remove entries older than this many days.
        #[arg(long)]
        unused_days: u64,

        /// Cache directory.
        #[arg(long, default_value = "data/cache")]
        cache_dir: PathBuf,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Download { config, force } => run_download(&config, force),
        Commands::Build {
            config,
            offline,
            synthetic,
            force,
            live,
            out,
        } => run_build(&config, offline, synthetic, force, live, &out),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
            CacheAction::Clean {
                unused_days,
                cache_dir,
                confirm,
            } => run_cache_clean(&cache_dir, unused_days, confirm),
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn run_download(config_path: &Path, force: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let collectors =
        CollectorSet::from_config(&config).context("failed to build HTTP collectors")?;
    let cache = RawCache::new(&config.cache_dir);

    let summary = download_all(&config, &collectors, &cache, force, &LogProgress);

    println!(
        "Downloaded {}/{} series ({} from cache, {} records)",
        summary.succeeded, summary.total, summary.from_cache, summary.records
    );
    if !summary.all_succeeded() {
        for (series, err) in &summary.errors {
            eprintln!("Error for {series}: {err}");
        }
        bail!("{} of {} series failed", summary.failed, summary.total);
    }
    Ok(())
}

fn run_build(
    config_path: &Path,
    offline: bool,
    synthetic: bool,
    force: bool,
    live: Option<u32>,
    out: &Path,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(n) = live {
        config = config
            .live_window(n, chrono::Utc::now())
            .context("invalid live window")?;
    }

    let collectors = if synthetic {
        CollectorSet::synthetic(&config)
    } else if offline {
        CollectorSet::new()
    } else {
        CollectorSet::from_config(&config).context("failed to build HTTP collectors")?
    };
    let cache = RawCache::new(&config.cache_dir);
    let options = RunOptions { force, offline };

    let output = Pipeline::run(&config, &collectors, Some(&cache), options)?;

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let dataset_path = out.join("dataset.csv");
    let features_path = out.join("features.parquet");
    let manifest_path = out.join("manifest.json");

    write_dataset_csv(&dataset_path, &output.dataset)?;
    write_split_csvs(out, &output.split)?;
    write_table_parquet(&features_path, &output.transformed)?;
    let manifest = DatasetManifest::from_output(&output);
    manifest.write(&manifest_path)?;

    print_summary(&manifest, synthetic);
    println!("Artifacts saved to: {}", out.display());
    Ok(())
}

fn print_summary(manifest: &DatasetManifest, synthetic: bool) {
    println!();
    println!("=== Dataset ===");
    println!("Fingerprint:    {}", &manifest.fingerprint[..16.min(manifest.fingerprint.len())]);
    println!("Target:         {} (+{} intervals)", manifest.target, manifest.horizon);
    if let (Some(first), Some(last)) = (manifest.first_interval, manifest.last_interval) {
        println!("Period:         {first} to {last}");
    }
    println!("Aligned rows:   {}", manifest.aligned_rows);
    println!(
        "Dataset rows:   {} ({} complete)",
        manifest.dataset_rows, manifest.complete_rows
    );
    let parts: Vec<String> = manifest
        .split
        .iter()
        .map(|p| format!("{} {}", p.name, p.rows))
        .collect();
    println!("Split:          {}", parts.join(" / "));
    println!("Features:       {}", manifest.feature_columns.len());
    for s in &manifest.series {
        println!(
            "  {:<10} {:<20} {:>8} records {:>6} intervals ({:?})",
            s.source.as_str(),
            s.symbol,
            s.records,
            s.intervals,
            s.origin
        );
    }
    if !manifest.warnings.is_empty() {
        println!();
        for w in &manifest.warnings {
            println!("WARNING: {w}");
        }
    }
    if synthetic {
        println!();
        println!("WARNING: Dataset built from SYNTHETIC data");
    }
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let cache = RawCache::new(cache_dir);
    let entries = cache.status().context("reading cache")?;
    if entries.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    let total_size: u64 = entries
        .iter()
        .map(|m| cache.entry_size(m.source, &m.symbol))
        .sum();

    println!("Cache: {}", cache_dir.display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<10} {:<16} {:<35} {:>9} {:>10}",
        "Source", "Symbol", "Range", "Records", "Size"
    );
    println!("{}", "-".repeat(84));
    for meta in &entries {
        let range = format!(
            "{} to {}",
            meta.start.format("%Y-%m-%d %H:%M"),
            meta.end.format("%Y-%m-%d %H:%M")
        );
        println!(
            "{:<10} {:<16} {:<35} {:>9} {:>10}",
            meta.source.as_str(),
            meta.symbol,
            range,
            meta.record_count,
            format_size(cache.entry_size(meta.source, &meta.symbol))
        );
    }
    Ok(())
}

fn run_cache_clean(cache_dir: &Path, unused_days: u64, confirm: bool) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let days = i64::try_from(unused_days).context("--unused-days out of range")?;
    let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
    let cache = RawCache::new(cache_dir);

    let stale = cache.stale(cutoff).context("reading cache")?;
    if stale.is_empty() {
        println!("No entries older than {unused_days} days to remove.");
        return Ok(());
    }

    println!(
        "Found {} entr(y/ies) older than {unused_days} days:",
        stale.len()
    );
    for meta in &stale {
        let size = cache.entry_size(meta.source, &meta.symbol);
        println!("  {} {} ({})", meta.source, meta.symbol, format_size(size));
    }

    if !confirm {
        println!();
        println!("Dry run: pass --confirm to actually delete.");
        return Ok(());
    }

    let removed = cache.clean(cutoff).context("removing stale entries")?;
    println!("Done. Removed {} entr(y/ies).", removed.len());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
