//! Async filesystem helpers
//!
//! Streaming SHA-256 hashing, size/existence checks and recursive
//! directory enumeration. Directory walks run on the blocking pool so the
//! event loop never stalls on a large tree.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::warn;
use walkdir::WalkDir;

/// Chunk size for streaming reads. Hashing is disk-bound; the exact
/// buffer size barely matters past this point.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 hex digest of a byte slice.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file by streaming its contents.
///
/// Avoids loading the whole file into memory; large videos pass through
/// here too.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Byte length of a file.
pub async fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).await?.len())
}

/// Whether a path exists (false on permission errors too).
pub async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Remove a file, tolerating it already being gone.
pub async fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write a byte buffer to a file, creating parent directories as needed.
pub async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, data).await?;
    Ok(())
}

/// Recursively enumerate regular files under `dir`, sorted by file name
/// at each level so enumeration order is stable across runs.
///
/// A missing or unreadable directory yields an empty list with a warning
/// rather than an error; the synchronizer treats such a category as empty.
pub async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        if !dir.is_dir() {
            warn!(path = %dir.display(), "not a directory or does not exist, skipping");
            return Vec::new();
        }
        WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .collect()
    })
    .await
    .map_err(|e| crate::error::AppError::internal(format!("directory walk panicked: {e}")))?;
    Ok(files)
}

/// Count regular files under `dir`.
pub async fn count_files(dir: &Path) -> Result<usize> {
    Ok(collect_files(dir).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_bytes_is_stable() {
        let one = hash_bytes(b"hello world");
        let two = hash_bytes(b"hello world");
        assert_eq!(one, two);
        assert_eq!(one.len(), 64);
        assert!(one.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_hash_file_matches_hash_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.bin");
        let content = b"some file content".repeat(1000);
        fs::write(&path, &content).await.unwrap();

        assert_eq!(hash_file(&path).await.unwrap(), hash_bytes(&content));
        assert_eq!(file_size(&path).await.unwrap(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_collect_files_recurses_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).await.unwrap();
        fs::write(dir.path().join("b.png"), b"b").await.unwrap();
        fs::write(dir.path().join("a.png"), b"a").await.unwrap();
        fs::write(dir.path().join("sub/c.png"), b"c").await.unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.png"),
                PathBuf::from("b.png"),
                PathBuf::from("sub/c.png"),
            ]
        );
        assert_eq!(count_files(dir.path()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_collect_files_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(collect_files(&missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_file_tolerates_absent() {
        let dir = TempDir::new().unwrap();
        remove_file(&dir.path().join("ghost.png")).await.unwrap();
    }
}
