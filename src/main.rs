use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use playlist_features::analyzer::{self, AnalyzeError, BatchOptions, FailurePolicy};
use playlist_features::config::AppConfig;
use playlist_features::dsp::NativeProvider;
use playlist_features::models::{RepresentationBundle, FeatureRecord};
use playlist_features::scanner;
use playlist_features::store::{Schema, StorageFormat, Store};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "playlist-features",
    version,
    about = "Extract per-track audio features and trajectory matrices from playlists"
)]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Storage format (defaults to config `storage`)
    #[arg(long, value_enum, global = true)]
    format: Option<StorageFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ExtractArgs {
    /// Also keep full-resolution representations (large)
    #[arg(long)]
    store_repr: bool,

    /// Write one artifact per track next to the playlist tables
    #[arg(long)]
    per_track: bool,

    /// Number of parallel workers (0 = auto-detect from config)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,

    /// Analyze only the first N files of each playlist (0 = all)
    #[arg(long, default_value = "0")]
    limit: usize,

    /// Record failed tracks and continue instead of aborting
    #[arg(long)]
    keep_going: bool,

    /// Per-track time limit in seconds (defaults to config, 0 = none).
    /// A timed-out track is abandoned, not killed: it keeps one analysis
    /// thread busy until it returns
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one playlist directory and write its feature tables
    Extract {
        /// Directory of raw audio files
        raw_dir: PathBuf,
        /// Destination directory (created if missing)
        extracted_dir: PathBuf,
        #[command(flatten)]
        args: ExtractArgs,
    },

    /// Run `extract` for every playlist directory under a root
    ExtractAll {
        /// Directory whose subdirectories are playlists
        raw_root: PathBuf,
        /// Destination root; each playlist goes to <root>/<name>
        extracted_root: PathBuf,
        #[command(flatten)]
        args: ExtractArgs,
    },

    /// Load every playlist feature table under a root and summarize it
    Tables {
        extracted_root: PathBuf,
    },

    /// Load per-track artifacts from one or more directories
    Load {
        dirs: Vec<PathBuf>,

        /// Skip the first N artifacts of each directory
        #[arg(long, default_value = "0")]
        start: usize,

        /// Load at most N artifacts per directory (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();
    config
        .analysis
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid [analysis] settings in config")?;

    let format = cli.format.unwrap_or(config.storage);
    let store = Store::new(format, Schema::for_settings(&config.analysis));

    match cli.command {
        Commands::Extract {
            raw_dir,
            extracted_dir,
            args,
        } => {
            extract_playlist(&config, &store, &raw_dir, &extracted_dir, &args)
                .with_context(|| format!("Extraction of {} failed", raw_dir.display()))?;
        }

        Commands::ExtractAll {
            raw_root,
            extracted_root,
            args,
        } => {
            let playlists = scanner::list_subdirectories(&raw_root)
                .with_context(|| format!("Failed to list {}", raw_root.display()))?;
            println!("Found {} playlists in {}", playlists.len(), raw_root.display());
            for raw_dir in playlists {
                let out = extracted_root.join(scanner::dir_name(&raw_dir));
                extract_playlist(&config, &store, &raw_dir, &out, &args)
                    .with_context(|| format!("Extraction of {} failed", raw_dir.display()))?;
            }
        }

        Commands::Tables { extracted_root } => {
            let rows = store
                .load_playlist_tables(&extracted_root)
                .context("Failed to load playlist tables")?;
            let mut per_playlist: BTreeMap<&str, usize> = BTreeMap::new();
            for row in &rows {
                *per_playlist.entry(row.playlist.as_deref().unwrap_or("?")).or_default() += 1;
            }
            for (playlist, count) in &per_playlist {
                println!("{:<30} {:>6} tracks", playlist, count);
            }
            println!("Total: {} tracks in {} playlists", rows.len(), per_playlist.len());
        }

        Commands::Load { dirs, start, limit } => {
            let tracks = store
                .load_many(&dirs, start, limit)
                .context("Failed to load track artifacts")?;
            for track in &tracks {
                let r = &track.record;
                println!(
                    "[{}] {} - {}  key {:>2}  {:>6.1} BPM{}",
                    r.playlist.as_deref().unwrap_or("?"),
                    r.artist,
                    r.song_name,
                    r.harmonic.key,
                    r.temporal.bpm,
                    if track.representation.is_empty() { "" } else { "  +repr" }
                );
            }
            println!("Loaded {} tracks", tracks.len());
        }
    }

    Ok(())
}

/// Analyze `raw_dir`, then write tables (and optionally per-track artifacts) to `out`.
fn extract_playlist(
    config: &AppConfig,
    store: &Store,
    raw_dir: &Path,
    out: &Path,
    args: &ExtractArgs,
) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    // CLI > config
    let workers = if args.jobs > 0 { args.jobs } else { config.resolve_workers() };
    let policy = if args.keep_going {
        FailurePolicy::Continue
    } else {
        config.batch.on_error
    };
    let timeout_secs = args.timeout.unwrap_or(config.batch.task_timeout_secs);

    let options = BatchOptions {
        extension: config.audio_extension.clone(),
        limit: args.limit,
        workers,
        save_representation: args.store_repr,
        policy,
        timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
    };

    let provider = Arc::new(NativeProvider::new(&config.analysis));
    let outcome = match analyzer::analyze_directory(provider, &config.analysis, raw_dir, &options) {
        Err(AnalyzeError::Scan(e)) => {
            log::warn!("{}; nothing to extract", e);
            return Ok(());
        }
        other => other.context("Analysis failed")?,
    };

    for failure in &outcome.failures {
        println!("  failed: {}: {}", failure.path.display(), failure.error);
    }

    if outcome.all_failed() {
        // Old tables would otherwise keep serving rows for this playlist
        let removed = store
            .remove_playlist_tables(out)
            .context("Failed to remove stale playlist tables")?;
        for path in &removed {
            log::warn!("Removed stale table {}", path.display());
        }
        anyhow::bail!(
            "{}: all {} tracks failed",
            raw_dir.display(),
            outcome.failures.len()
        );
    }

    if outcome.tracks.is_empty() {
        println!("{}: no tracks analyzed", raw_dir.display());
        return Ok(());
    }

    if args.per_track {
        outcome
            .tracks
            .par_iter()
            .try_for_each(|track| store.save(out, track).map(|_| ()))
            .context("Failed to save track artifacts")?;
    }

    let records: Vec<FeatureRecord> = outcome.tracks.iter().map(|t| t.record.clone()).collect();
    let bundles: Option<Vec<RepresentationBundle>> = args
        .store_repr
        .then(|| outcome.tracks.iter().map(|t| t.representation.clone()).collect());
    let written = store
        .store_playlist_tables(out, &records, bundles.as_deref())
        .context("Failed to store playlist tables")?;

    println!(
        "{}: {} analyzed, {} failed -> {}",
        raw_dir.display(),
        outcome.tracks.len(),
        outcome.failures.len(),
        written
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}
