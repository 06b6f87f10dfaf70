pub mod filename;

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// List audio files directly inside `dir` with the given extension.
///
/// Results are sorted by file name so repeated runs see the same order.
/// `limit > 0` keeps only the first `limit` files.
pub fn discover_audio_files(
    dir: &Path,
    extension: &str,
    limit: usize,
) -> std::result::Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::MissingDirectory(dir.to_path_buf()));
    }

    let wanted = extension.trim_start_matches('.').to_lowercase();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext == wanted {
            files.push(entry.into_path());
        }
    }

    if limit > 0 {
        files.truncate(limit);
    }

    log::debug!("Discovered {} .{} files in {}", files.len(), wanted, dir.display());
    Ok(files)
}

/// Immediate subdirectories of `root`, sorted by name.
pub fn list_subdirectories(root: &Path) -> std::result::Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingDirectory(root.to_path_buf()));
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Track name for an audio file: its stem.
pub fn track_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Name of the directory a path sits in, used as the playlist label.
pub fn enclosing_dir_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
}

/// Final component of a directory path.
pub fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b - two.mp3");
        touch(tmp.path(), "a - one.MP3");
        touch(tmp.path(), "cover.jpg");
        fs::create_dir(tmp.path().join("nested")).unwrap();
        touch(&tmp.path().join("nested"), "c - three.mp3");

        let files = discover_audio_files(tmp.path(), "mp3", 0).unwrap();
        let names: Vec<String> = files.iter().map(|p| track_name(p)).collect();
        assert_eq!(names, vec!["a - one", "b - two"]);
    }

    #[test]
    fn test_discover_limit() {
        let tmp = TempDir::new().unwrap();
        for i in 0..5 {
            touch(tmp.path(), &format!("x - {}.mp3", i));
        }
        let files = discover_audio_files(tmp.path(), ".mp3", 2).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(track_name(&files[0]), "x - 0");
    }

    #[test]
    fn test_discover_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = discover_audio_files(&missing, "mp3", 0).unwrap_err();
        assert!(matches!(err, ScanError::MissingDirectory(_)));
    }

    #[test]
    fn test_discover_empty_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_audio_files(tmp.path(), "mp3", 0).unwrap().is_empty());
    }

    #[test]
    fn test_enclosing_dir_name() {
        let p = PathBuf::from("/data/extracted/chill/A - B.track.json");
        assert_eq!(enclosing_dir_name(&p).as_deref(), Some("chill"));
        assert_eq!(dir_name(Path::new("/data/extracted/chill")), "chill");
    }

    #[test]
    fn test_list_subdirectories() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("rock")).unwrap();
        fs::create_dir(tmp.path().join("jazz")).unwrap();
        touch(tmp.path(), "stray.txt");
        let dirs = list_subdirectories(tmp.path()).unwrap();
        let names: Vec<String> = dirs.iter().map(|d| dir_name(d)).collect();
        assert_eq!(names, vec!["jazz", "rock"]);
    }
}
