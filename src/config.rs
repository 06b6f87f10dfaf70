use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::analyzer::FailurePolicy;
use crate::models::MFCC_FEATURES;
use crate::store::StorageFormat;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// File extension picked up by discovery, without the dot.
    pub audio_extension: String,
    /// Storage format for tables and per-track artifacts.
    pub storage: StorageFormat,
    pub analysis: AnalysisSettings,
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            audio_extension: crate::DEFAULT_AUDIO_EXTENSION.to_string(),
            storage: StorageFormat::default(),
            analysis: AnalysisSettings::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Signal-analysis parameters shared by the assembler and the built-in provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub n_mels: usize,
    /// Must exceed the number of MFCC coefficients kept in a record.
    pub n_mfcc: usize,
    pub hop_length: usize,
    pub frame_size: usize,
    /// Fixed length the tonnetz summary is resampled to.
    pub tonnetz_length: usize,
    /// Collapse transitions through the "no chord" label.
    pub ignore_non_chords: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            n_mels: 256,
            n_mfcc: 13,
            hop_length: 512,
            frame_size: 2048,
            tonnetz_length: 2048,
            ignore_non_chords: true,
        }
    }
}

impl AnalysisSettings {
    /// Reject settings no analysis could run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_mfcc <= MFCC_FEATURES {
            return Err(format!(
                "n_mfcc must be greater than {} (got {})",
                MFCC_FEATURES, self.n_mfcc
            ));
        }
        if self.hop_length == 0 || self.frame_size == 0 {
            return Err("hop_length and frame_size must be non-zero".to_string());
        }
        if self.n_mels == 0 {
            return Err("n_mels must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Batch behaviour when individual tracks fail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub on_error: FailurePolicy,
    /// Per-track time limit in seconds. 0 = unlimited.
    pub task_timeout_secs: u64,
}

impl AppConfig {
    /// Load config from `~/.config/playlist-features/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.audio_extension, "mp3");
        assert_eq!(config.storage, StorageFormat::Compressed);
        assert_eq!(config.analysis.n_mfcc, 13);
        assert_eq!(config.analysis.tonnetz_length, 2048);
        assert_eq!(config.batch.on_error, FailurePolicy::Abort);
        assert!(config.analysis.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            workers = 3
            storage = "plain"

            [analysis]
            n_mels = 128

            [batch]
            on_error = "continue"
            "#,
        )
        .unwrap();
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.storage, StorageFormat::Plain);
        assert_eq!(config.analysis.n_mels, 128);
        assert_eq!(config.analysis.hop_length, 512);
        assert_eq!(config.batch.on_error, FailurePolicy::Continue);
        assert_eq!(config.batch.task_timeout_secs, 0);
    }

    #[test]
    fn test_small_n_mfcc_rejected() {
        let settings = AnalysisSettings {
            n_mfcc: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_auto_workers_at_least_one() {
        assert!(AppConfig::default().resolve_workers() >= 1);
    }
}
