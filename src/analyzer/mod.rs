pub mod decode;
pub mod features;
pub mod provider;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Deserialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AnalysisSettings;
use crate::models::{AudioTrack, ProcessedTrack};
use crate::scanner::{self, ScanError};
use crate::trajectory::TrajectoryError;
use features::FeatureAssembler;
use provider::{AnalysisProvider, ProviderError};

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Analysis provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Invalid analysis settings: {0}")]
    InvalidSettings(String),
    #[error("Track '{0}' has no decoded waveform")]
    MissingWaveform(String),
    #[error("Analysis panicked: {0}")]
    Panicked(String),
    #[error("Analysis timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{}: {source}", .path.display())]
    Track {
        path: PathBuf,
        #[source]
        source: Box<AnalyzeError>,
    },
}

/// What a batch does when one track fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The first failure (in discovery order) fails the batch.
    #[default]
    Abort,
    /// Record failures and keep every track that succeeded.
    Continue,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub extension: String,
    /// Analyze at most this many files. 0 = all.
    pub limit: usize,
    pub workers: usize,
    pub save_representation: bool,
    pub policy: FailurePolicy,
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            extension: crate::DEFAULT_AUDIO_EXTENSION.to_string(),
            limit: 0,
            workers: 1,
            save_representation: false,
            policy: FailurePolicy::Abort,
            timeout: None,
        }
    }
}

#[derive(Debug)]
pub struct TrackFailure {
    pub path: PathBuf,
    pub error: AnalyzeError,
}

/// Tracks in discovery order, plus failures when running with [`FailurePolicy::Continue`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub tracks: Vec<ProcessedTrack>,
    pub failures: Vec<TrackFailure>,
}

impl BatchOutcome {
    /// Tracks were found but none of them produced a record.
    pub fn all_failed(&self) -> bool {
        self.tracks.is_empty() && !self.failures.is_empty()
    }
}

/// Analyze every audio file in `dir` on a bounded worker pool.
///
/// Blocks until every task has finished. Each task decodes and assembles one
/// file with fresh state; panics are caught per task. With a timeout the
/// analysis moves to a second pool of the same size and the workers only wait
/// on it, so a hung decode cannot stall the batch. An abandoned task keeps its
/// analysis thread until it returns.
/// Every produced track gets `dir`'s name as its playlist.
pub fn analyze_directory<P>(
    provider: Arc<P>,
    settings: &AnalysisSettings,
    dir: &Path,
    options: &BatchOptions,
) -> std::result::Result<BatchOutcome, AnalyzeError>
where
    P: AnalysisProvider + 'static,
{
    settings.validate().map_err(AnalyzeError::InvalidSettings)?;

    let files = scanner::discover_audio_files(dir, &options.extension, options.limit)?;
    if files.is_empty() {
        log::info!("No .{} files in {}", options.extension, dir.display());
        return Ok(BatchOutcome::default());
    }

    let playlist = scanner::dir_name(dir);
    let workers = options.workers.max(1);
    log::info!(
        "Analyzing {} tracks from '{}' with {} workers",
        files.len(),
        playlist,
        workers
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let analysis_pool = match options.timeout {
        Some(_) => Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("analyze-{i}"))
                .build()?,
        ),
        None => None,
    };

    // par_iter + collect keeps discovery order whatever the completion order
    let results: Vec<_> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let result = run_task(&provider, settings, path, options, analysis_pool.as_ref());
                pb.inc(1);
                result
            })
            .collect()
    });

    let mut outcome = BatchOutcome::default();
    for (path, result) in files.into_iter().zip(results) {
        match result {
            Ok(mut track) => {
                track.set_playlist(&playlist);
                outcome.tracks.push(track);
            }
            Err(error) => match options.policy {
                FailurePolicy::Abort => {
                    pb.abandon_with_message(format!("Failed on {}", path.display()));
                    return Err(AnalyzeError::Track {
                        path,
                        source: Box::new(error),
                    });
                }
                FailurePolicy::Continue => {
                    log::warn!("Skipping {}: {}", path.display(), error);
                    outcome.failures.push(TrackFailure { path, error });
                }
            },
        }
    }

    pb.finish_with_message(format!(
        "Done: {} analyzed, {} failed",
        outcome.tracks.len(),
        outcome.failures.len()
    ));
    log::info!(
        "'{}': {} analyzed, {} failed",
        playlist,
        outcome.tracks.len(),
        outcome.failures.len()
    );

    Ok(outcome)
}

/// Run one file's analysis with panic isolation and the optional time limit.
fn run_task<P>(
    provider: &Arc<P>,
    settings: &AnalysisSettings,
    path: &Path,
    options: &BatchOptions,
    analysis_pool: Option<&rayon::ThreadPool>,
) -> std::result::Result<ProcessedTrack, AnalyzeError>
where
    P: AnalysisProvider + 'static,
{
    let save = options.save_representation;
    let (Some(limit), Some(analysis_pool)) = (options.timeout, analysis_pool) else {
        return isolate(|| analyze_file(provider.as_ref(), settings, path, save));
    };

    let (tx, rx) = mpsc::channel();
    let provider = Arc::clone(provider);
    let settings = settings.clone();
    let owned_path = path.to_path_buf();
    analysis_pool.spawn(move || {
        let result = isolate(|| analyze_file(provider.as_ref(), &settings, &owned_path, save));
        // The receiver is gone if the task already timed out
        let _ = tx.send(result);
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{} exceeded {:?}, abandoning its task", path.display(), limit);
            Err(AnalyzeError::TimedOut(limit))
        }
        Err(RecvTimeoutError::Disconnected) => Err(AnalyzeError::Panicked(
            "analysis task exited without a result".to_string(),
        )),
    }
}

/// Decode one file and assemble its features.
fn analyze_file<P: AnalysisProvider + ?Sized>(
    provider: &P,
    settings: &AnalysisSettings,
    path: &Path,
    save_representation: bool,
) -> std::result::Result<ProcessedTrack, AnalyzeError> {
    log::debug!(
        "Analyzing: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );

    let waveform = provider.decode_waveform(path)?;
    log::debug!(
        "Decoded {:.1}s at {} Hz",
        waveform.duration_secs(),
        waveform.sample_rate
    );
    let track = AudioTrack::with_waveform(scanner::track_name(path), waveform);
    let processed = FeatureAssembler::new(provider, settings, save_representation)?.assemble(&track)?;

    log::debug!("Finished: {}", track.name);
    Ok(processed)
}

fn isolate<T>(
    task: impl FnOnce() -> std::result::Result<T, AnalyzeError>,
) -> std::result::Result<T, AnalyzeError> {
    panic::catch_unwind(AssertUnwindSafe(task))
        .unwrap_or_else(|payload| Err(AnalyzeError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
