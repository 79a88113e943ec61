// src/fingerprint.rs
//
// Content fingerprints used as mapping keys, and discovery of release files.
//
// INVARIANTS:
// - A fingerprint depends on content and size only, never on the path
// - Only the first FINGERPRINT_PREFIX bytes are read

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

/// Bytes hashed from the start of a file
pub const FINGERPRINT_PREFIX: u64 = 4 * 1024 * 1024;

const VIDEO_EXTENSIONS: [&str; 7] = ["mkv", "mp4", "avi", "m4v", "webm", "mov", "ts"];

/// SHA-256 over the first 4 MiB of the file followed by its size.
pub fn fingerprint_file(path: &Path) -> AppResult<String> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    let mut reader = file.take(FINGERPRINT_PREFIX);
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    hasher.update(size.to_le_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Video files under `root`, sorted by path. A file path is returned as is.
pub fn collect_video_files(root: &Path) -> AppResult<Vec<PathBuf>> {
    if !root.exists() {
        return Err(AppError::InvalidInput(format!(
            "Path does not exist: {}",
            root.display()
        )));
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_fingerprint_ignores_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a.mkv", b"same bytes");
        let b = write_file(dir.path(), "b.mkv", b"same bytes");
        let c = write_file(dir.path(), "c.mkv", b"other bytes");

        let fa = fingerprint_file(&a).unwrap();
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, fingerprint_file(&b).unwrap());
        assert_ne!(fa, fingerprint_file(&c).unwrap());
    }

    #[test]
    fn test_fingerprint_includes_size_past_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = vec![7u8; FINGERPRINT_PREFIX as usize];
        let mut longer = prefix.clone();
        longer.extend_from_slice(b"tail");

        let a = write_file(dir.path(), "a.mkv", &prefix);
        let b = write_file(dir.path(), "b.mkv", &longer);
        assert_ne!(fingerprint_file(&a).unwrap(), fingerprint_file(&b).unwrap());
    }

    #[test]
    fn test_collect_video_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Season 2")).unwrap();
        write_file(dir.path(), "Show - 01.mkv", b"1");
        write_file(dir.path(), "Show - 01.ass", b"sub");
        write_file(&dir.path().join("Season 2"), "Show S2 - 01.MP4", b"2");

        let files = collect_video_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Show S2 - 01.MP4", "Show - 01.mkv"]);

        assert!(collect_video_files(&dir.path().join("missing")).is_err());
    }
}
