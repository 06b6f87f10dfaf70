use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{Result, Store, StoreError};
use crate::models::{FeatureRecord, RepresentationBundle, TrackIdentity};
use crate::scanner;

const FEATURES_MARKER: &str = ".features";
const REPRESENTATIONS_MARKER: &str = ".representations";

/// One row of a representations table, joined to the feature table by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationRow {
    pub identity: TrackIdentity,
    pub bundle: RepresentationBundle,
}

impl Store {
    fn table_path(&self, directory: &Path, marker: &str) -> PathBuf {
        let playlist = scanner::dir_name(directory);
        directory.join(format!("{}{}{}", playlist, marker, self.format.extension()))
    }

    /// Write the playlist's feature table and, when bundles are given, its
    /// representation table. Every row's playlist is the directory name.
    pub fn store_playlist_tables(
        &self,
        directory: &Path,
        records: &[FeatureRecord],
        bundles: Option<&[RepresentationBundle]>,
    ) -> Result<Vec<PathBuf>> {
        if let Some(bundles) = bundles {
            if bundles.len() != records.len() {
                return Err(StoreError::Misaligned {
                    records: records.len(),
                    bundles: bundles.len(),
                });
            }
        }

        fs::create_dir_all(directory)?;
        let playlist = scanner::dir_name(directory);

        let rows: Vec<FeatureRecord> = records
            .iter()
            .map(|r| FeatureRecord {
                playlist: Some(playlist.clone()),
                ..r.clone()
            })
            .collect();

        let mut written = Vec::new();
        let features_path = self.table_path(directory, FEATURES_MARKER);
        self.write_atomic(&features_path, &rows)?;
        written.push(features_path);

        if let Some(bundles) = bundles {
            let rows: Vec<RepresentationRow> = rows
                .iter()
                .zip(bundles)
                .map(|(record, bundle)| RepresentationRow {
                    identity: record.identity(),
                    bundle: bundle.clone(),
                })
                .collect();
            let path = self.table_path(directory, REPRESENTATIONS_MARKER);
            self.write_atomic(&path, &rows)?;
            written.push(path);
        }

        log::info!(
            "Stored {} rows for playlist '{}' in {}",
            records.len(),
            playlist,
            directory.display()
        );
        Ok(written)
    }

    /// Delete the playlist's feature and representation tables, if present.
    ///
    /// Returns the paths that were removed.
    pub fn remove_playlist_tables(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for marker in [FEATURES_MARKER, REPRESENTATIONS_MARKER] {
            let path = self.table_path(directory, marker);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Concatenate the feature tables of every immediate subdirectory of `root`.
    ///
    /// Subdirectories are visited in name order. Each row's playlist is taken
    /// from the directory its table was found in.
    pub fn load_playlist_tables(&self, root: &Path) -> Result<Vec<FeatureRecord>> {
        let mut combined = Vec::new();
        for dir in scanner::list_subdirectories(root)? {
            let playlist = scanner::dir_name(&dir);
            for path in self.list_with_suffix(&dir, FEATURES_MARKER)? {
                let rows: Vec<FeatureRecord> = self.read_checked(&path)?;
                log::debug!("{}: {} rows", path.display(), rows.len());
                combined.extend(rows.into_iter().map(|row| FeatureRecord {
                    playlist: Some(playlist.clone()),
                    ..row
                }));
            }
        }
        Ok(combined)
    }

    /// Concatenate the representation tables of every immediate subdirectory of `root`.
    pub fn load_representation_tables(&self, root: &Path) -> Result<Vec<RepresentationRow>> {
        let mut combined = Vec::new();
        for dir in scanner::list_subdirectories(root)? {
            let playlist = scanner::dir_name(&dir);
            for path in self.list_with_suffix(&dir, REPRESENTATIONS_MARKER)? {
                let rows: Vec<RepresentationRow> = self.read_checked(&path)?;
                combined.extend(rows.into_iter().map(|mut row| {
                    row.identity.playlist = Some(playlist.clone());
                    row
                }));
            }
        }
        Ok(combined)
    }
}
