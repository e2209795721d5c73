//! Application configuration
//!
//! All configuration is carried by explicit structs built once at startup
//! and passed into components at construction. There is no module-level
//! mutable state; in particular the category -> directory map is a plain
//! field of [`AppConfig`].
//!
//! The binary builds these from environment variables (a `.env` file is
//! honored via `dotenvy`); tests construct them literally.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling for files served without compression: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// One logical content bucket backed by a directory tree.
#[derive(Debug, Clone)]
pub struct CategoryDir {
    /// Category name as stored in the record store (e.g. "meme").
    pub name: String,
    /// Directory holding this category's files, relative to the data root.
    pub dir: PathBuf,
}

/// Configuration for the file pipeline (store, synchronizer, compression).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root under which all managed files and the database live.
    pub data_dir: PathBuf,
    /// Where compressed artifacts are moved after a successful pass.
    pub converted_dir: PathBuf,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// The fixed category set. Record categories must come from this list.
    pub categories: Vec<CategoryDir>,
    /// Size budget above which files must be compressed before serving.
    pub max_file_size: u64,
}

impl AppConfig {
    /// Build the configuration from environment variables.
    ///
    /// Recognized variables (all optional):
    /// - `VAULT_DATA_DIR` (default `./data`)
    /// - `VAULT_MAX_FILE_SIZE` (bytes, default 10 MiB)
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(
            std::env::var("VAULT_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );
        let max_file_size = match std::env::var("VAULT_MAX_FILE_SIZE") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::config(format!("VAULT_MAX_FILE_SIZE is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_MAX_FILE_SIZE,
        };
        Ok(Self::with_data_dir(data_dir, max_file_size))
    }

    /// Build a configuration rooted at `data_dir` with the standard
    /// category layout (`memes/` -> "meme", `private/` -> "private").
    pub fn with_data_dir(data_dir: PathBuf, max_file_size: u64) -> Self {
        let categories = vec![
            CategoryDir {
                name: "meme".to_string(),
                dir: PathBuf::from("memes"),
            },
            CategoryDir {
                name: "private".to_string(),
                dir: PathBuf::from("private"),
            },
        ];
        Self {
            converted_dir: data_dir.join("converted"),
            database_path: data_dir.join("files.db"),
            data_dir,
            categories,
            max_file_size,
        }
    }

    /// Look up a category by name.
    pub fn category(&self, name: &str) -> Option<&CategoryDir> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Absolute on-disk directory for a category.
    pub fn category_dir(&self, category: &CategoryDir) -> PathBuf {
        self.data_dir.join(&category.dir)
    }

    /// Resolve a store-relative path to its on-disk location.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Make a disk path store-relative (relative to the data root).
    ///
    /// Paths outside the data root are stored as given.
    pub fn relativize<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.data_dir).unwrap_or(path)
    }

    /// Create all configured directories.
    pub async fn ensure_directories(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.converted_dir).await?;
        for category in &self.categories {
            tokio::fs::create_dir_all(self.category_dir(category)).await?;
        }
        Ok(())
    }
}

/// Configuration for the remote content API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub user_agent: String,
    /// Worker tasks pulling from the request queue.
    pub max_workers: usize,
    /// Maximum simultaneous in-flight requests.
    pub max_inflight: usize,
    /// Minimum spacing between requests, shared across all workers.
    pub request_interval: Duration,
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Build the API configuration from environment variables.
    ///
    /// `MEDIA_USER_AGENT`, `MEDIA_BASE_URL`, `MEDIA_USERNAME` and
    /// `MEDIA_API_KEY` are required; the remote API rejects anonymous
    /// clients without an identifying user agent.
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            std::env::var(name)
                .map_err(|_| AppError::config(format!("missing required variable '{name}'")))
        };
        let numeric = |name: &str, default: u64| -> Result<u64> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .parse::<u64>()
                    .map_err(|_| AppError::config(format!("{name} is not a number: {raw}"))),
                Err(_) => Ok(default),
            }
        };

        Ok(Self {
            base_url: required("MEDIA_BASE_URL")?,
            username: required("MEDIA_USERNAME")?,
            api_key: required("MEDIA_API_KEY")?,
            user_agent: required("MEDIA_USER_AGENT")?,
            max_workers: numeric("MEDIA_MAX_WORKERS", 2)? as usize,
            max_inflight: numeric("MEDIA_MAX_REQUESTS", 2)? as usize,
            request_interval: Duration::from_secs(numeric("MEDIA_REQUEST_INTERVAL_SECS", 3)?),
            request_timeout: Duration::from_secs(numeric("MEDIA_REQUEST_TIMEOUT", 10)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_lookup() {
        let config = AppConfig::with_data_dir(PathBuf::from("/tmp/vault"), DEFAULT_MAX_FILE_SIZE);
        assert!(config.category("meme").is_some());
        assert!(config.category("private").is_some());
        assert!(config.category("unknown").is_none());
    }

    #[test]
    fn test_resolve_and_relativize_roundtrip() {
        let config = AppConfig::with_data_dir(PathBuf::from("/tmp/vault"), DEFAULT_MAX_FILE_SIZE);
        let rel = Path::new("memes/doge.png");
        let abs = config.resolve(rel);
        assert_eq!(abs, PathBuf::from("/tmp/vault/memes/doge.png"));
        assert_eq!(config.relativize(&abs), rel);
    }

    #[test]
    fn test_relativize_foreign_path_unchanged() {
        let config = AppConfig::with_data_dir(PathBuf::from("/tmp/vault"), DEFAULT_MAX_FILE_SIZE);
        let foreign = Path::new("/elsewhere/file.png");
        assert_eq!(config.relativize(foreign), foreign);
    }
}
