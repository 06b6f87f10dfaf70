pub mod tables;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::AnalysisSettings;
use crate::models::{ProcessedTrack, MFCC_FEATURES};
use crate::scanner::{self, ScanError};
use crate::trajectory::{CHORD_LABELS, MIDI_NOTE_COUNT};

/// Bumped whenever the persisted record layout changes.
pub const SCHEMA_VERSION: u32 = 2;

/// Marker between a per-track artifact's name and its extension.
const TRACK_MARKER: &str = ".track";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("{}: written with {found:?}, expected {expected:?}", .path.display())]
    SchemaMismatch {
        path: PathBuf,
        expected: Schema,
        found: Schema,
    },
    #[error("{records} feature records but {bundles} representation bundles")]
    Misaligned { records: usize, bundles: usize },
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// On-disk encoding of every artifact and table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Plain JSON.
    Plain,
    /// Gzip-compressed JSON.
    #[default]
    Compressed,
}

impl StorageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Plain => ".json",
            StorageFormat::Compressed => ".json.gz",
        }
    }

    fn encode<T: Serialize>(self, writer: impl Write, value: &T) -> Result<()> {
        match self {
            StorageFormat::Plain => {
                let mut writer = BufWriter::new(writer);
                serde_json::to_writer(&mut writer, value)?;
                writer.flush()?;
            }
            StorageFormat::Compressed => {
                // Header mtime stays 0 so identical input gives identical bytes
                let mut encoder = GzEncoder::new(BufWriter::new(writer), Compression::default());
                serde_json::to_writer(&mut encoder, value)?;
                encoder.finish()?.flush()?;
            }
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(self, reader: impl Read) -> Result<T> {
        let reader = BufReader::new(reader);
        let value = match self {
            StorageFormat::Plain => serde_json::from_reader(reader)?,
            StorageFormat::Compressed => serde_json::from_reader(GzDecoder::new(reader))?,
        };
        Ok(value)
    }
}

/// Layout and analysis parameters stamped into every file so runs with
/// different settings never mix.
///
/// Every `AnalysisSettings` field that changes a stored value belongs here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub chord_alphabet: usize,
    pub note_alphabet: usize,
    pub tonnetz_length: usize,
    pub mfcc_features: usize,
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub hop_length: usize,
    pub frame_size: usize,
    pub ignore_non_chords: bool,
}

impl Schema {
    pub fn for_settings(settings: &AnalysisSettings) -> Self {
        Self {
            version: SCHEMA_VERSION,
            chord_alphabet: CHORD_LABELS.len(),
            note_alphabet: MIDI_NOTE_COUNT,
            tonnetz_length: settings.tonnetz_length,
            mfcc_features: MFCC_FEATURES,
            n_mfcc: settings.n_mfcc,
            n_mels: settings.n_mels,
            hop_length: settings.hop_length,
            frame_size: settings.frame_size,
            ignore_non_chords: settings.ignore_non_chords,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema: &'a Schema,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    schema: Schema,
    payload: serde_json::Value,
}

/// Reads and writes per-track artifacts and playlist tables in one format and schema.
#[derive(Debug, Clone)]
pub struct Store {
    format: StorageFormat,
    schema: Schema,
}

impl Store {
    pub fn new(format: StorageFormat, schema: Schema) -> Self {
        Self { format, schema }
    }

    /// Path of the per-track artifact for `name` inside `dir`.
    pub fn artifact_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}{}{}", name, TRACK_MARKER, self.format.extension()))
    }

    /// Write one track's artifact into `dir`, creating the directory if needed.
    ///
    /// Distinct tracks map to distinct files, so concurrent saves of
    /// different tracks never touch the same path.
    pub fn save(&self, dir: &Path, track: &ProcessedTrack) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = self.artifact_path(dir, track.name());
        self.write_atomic(&path, track)?;
        log::debug!("Saved {}", path.display());
        Ok(path)
    }

    /// Read one artifact. The playlist comes from the enclosing directory name.
    pub fn load(&self, path: &Path) -> Result<ProcessedTrack> {
        let mut track: ProcessedTrack = self.read_checked(path)?;
        match scanner::enclosing_dir_name(path) {
            Some(playlist) => track.set_playlist(&playlist),
            None => track.record.playlist = None,
        }
        Ok(track)
    }

    /// Load the artifacts of several directories.
    ///
    /// Within each directory files are taken in name order and sliced to
    /// `[start, start + limit)` (`limit == 0` means no upper bound). Files are
    /// decoded in parallel; any failure fails the whole call.
    pub fn load_many(&self, dirs: &[PathBuf], start: usize, limit: usize) -> Result<Vec<ProcessedTrack>> {
        let mut paths = Vec::new();
        for dir in dirs {
            let files = self.list_with_suffix(dir, TRACK_MARKER)?;
            let end = if limit > 0 {
                start.saturating_add(limit).min(files.len())
            } else {
                files.len()
            };
            if start < end {
                paths.extend_from_slice(&files[start..end]);
            }
        }

        log::info!("Loading {} artifacts from {} directories", paths.len(), dirs.len());
        paths.par_iter().map(|path| self.load(path)).collect()
    }

    /// Files in `dir` named `*<marker><ext>`, sorted by name.
    fn list_with_suffix(&self, dir: &Path, marker: &str) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(StoreError::MissingDirectory(dir.to_path_buf()));
        }
        let suffix = format!("{}{}", marker, self.format.extension());
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(&suffix));
            if entry.file_type().is_file() && matches {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Serialize into a temporary file beside `path`, then rename over it.
    fn write_atomic<T: Serialize>(&self, path: &Path, payload: &T) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        let envelope = EnvelopeRef {
            schema: &self.schema,
            payload,
        };
        self.format.encode(tmp.as_file_mut(), &envelope)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Read a file, reject it if its schema differs, then decode the payload.
    fn read_checked<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let envelope: Envelope = self.format.decode(File::open(path)?)?;
        if envelope.schema != self.schema {
            return Err(StoreError::SchemaMismatch {
                path: path.to_path_buf(),
                expected: self.schema.clone(),
                found: envelope.schema,
            });
        }
        Ok(serde_json::from_value(envelope.payload)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{AudioTrack, FeatureRecord, MeanVar, RepresentationBundle};
    use ndarray::Array2;
    use tempfile::TempDir;

    pub(crate) fn store(format: StorageFormat) -> Store {
        Store::new(format, Schema::for_settings(&AnalysisSettings::default()))
    }

    /// A track with a few non-default values; all of them exact in binary.
    pub(crate) fn sample_track(name: &str) -> ProcessedTrack {
        let mut record = FeatureRecord::for_track(&AudioTrack::new(name));
        record.temporal.bpm = 120.0;
        record.spectral.centroid = MeanVar { mean: 1500.5, var: 0.25 };
        record.spectral.mfcc[3] = MeanVar { mean: -2.0, var: 0.5 };
        record.harmonic.key = 7;
        record.harmonic.tonnetz = vec![0.125; 4];
        record.harmonic.chord_trajectory = vec![0.0, 1.0, 2.0];
        let representation = RepresentationBundle {
            chroma: Some(Array2::from_shape_fn((12, 3), |(r, c)| (r * c) as f32 * 0.5)),
            zero_crossings: Some(vec![true, false]),
            ..Default::default()
        };
        ProcessedTrack {
            record,
            representation,
        }
    }

    #[test]
    fn test_round_trip_both_formats() {
        for format in [StorageFormat::Plain, StorageFormat::Compressed] {
            let tmp = TempDir::new().unwrap();
            let dir = tmp.path().join("Rock");
            let store = store(format);

            let mut original = sample_track("A, B - Song1");
            original.set_playlist("Somewhere else");
            let path = store.save(&dir, &original).unwrap();
            assert!(path.to_string_lossy().ends_with(&format!(".track{}", format.extension())));

            let loaded = store.load(&path).unwrap();
            assert_eq!(loaded.record.playlist.as_deref(), Some("Rock"));
            assert_eq!(loaded.representation, original.representation);
            let mut expected = original.record.clone();
            expected.playlist = Some("Rock".to_string());
            assert_eq!(loaded.record, expected);
        }
    }

    #[test]
    fn test_save_leaves_no_temporary_files() {
        let tmp = TempDir::new().unwrap();
        let store = store(StorageFormat::Plain);
        store.save(tmp.path(), &sample_track("x")).unwrap();
        store.save(tmp.path(), &sample_track("x")).unwrap();
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let writer = store(StorageFormat::Plain);
        let path = writer.save(tmp.path(), &sample_track("x")).unwrap();

        let settings = AnalysisSettings {
            tonnetz_length: 64,
            ..Default::default()
        };
        let reader = Store::new(StorageFormat::Plain, Schema::for_settings(&settings));
        let err = reader.load(&path).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_schema_mismatch_on_analysis_settings() {
        let tmp = TempDir::new().unwrap();
        let writer = store(StorageFormat::Plain);
        let path = writer.save(tmp.path(), &sample_track("x")).unwrap();
        writer
            .store_playlist_tables(&tmp.path().join("mix"), &[sample_track("y").record], None)
            .unwrap();

        let variants = [
            AnalysisSettings {
                ignore_non_chords: false,
                ..Default::default()
            },
            AnalysisSettings {
                hop_length: 256,
                ..Default::default()
            },
            AnalysisSettings {
                n_mels: 64,
                ..Default::default()
            },
            AnalysisSettings {
                frame_size: 4096,
                ..Default::default()
            },
            AnalysisSettings {
                n_mfcc: 20,
                ..Default::default()
            },
        ];
        for settings in variants {
            let reader = Store::new(StorageFormat::Plain, Schema::for_settings(&settings));
            assert!(matches!(
                reader.load(&path).unwrap_err(),
                StoreError::SchemaMismatch { .. }
            ));
            assert!(matches!(
                reader.load_playlist_tables(tmp.path()).unwrap_err(),
                StoreError::SchemaMismatch { .. }
            ));
        }
    }

    #[test]
    fn test_load_many_slices_each_directory() {
        let tmp = TempDir::new().unwrap();
        let store = store(StorageFormat::Compressed);
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        for name in ["t3", "t1", "t2"] {
            store.save(&a, &sample_track(name)).unwrap();
            store.save(&b, &sample_track(name)).unwrap();
        }

        let dirs = vec![a.clone(), b.clone()];
        let all = store.load_many(&dirs, 0, 0).unwrap();
        let names: Vec<_> = all.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["t1", "t2", "t3", "t1", "t2", "t3"]);
        assert_eq!(all[3].record.playlist.as_deref(), Some("b"));

        let sliced = store.load_many(&dirs, 1, 1).unwrap();
        let names: Vec<_> = sliced.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["t2", "t2"]);

        assert!(store.load_many(&dirs, 5, 0).unwrap().is_empty());
    }

    #[test]
    fn test_load_many_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let err = store(StorageFormat::Plain)
            .load_many(&[tmp.path().join("gone")], 0, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingDirectory(_)));
    }

    #[test]
    fn test_formats_do_not_mix() {
        let tmp = TempDir::new().unwrap();
        store(StorageFormat::Plain).save(tmp.path(), &sample_track("x")).unwrap();
        let found = store(StorageFormat::Compressed)
            .load_many(&[tmp.path().to_path_buf()], 0, 0)
            .unwrap();
        assert!(found.is_empty());
    }
}
