//! File record model
//!
//! One [`FileRecord`] per distinct content hash. The hash identifies the
//! logical content regardless of where the file sits on disk; `file_path`
//! is the canonical artifact and the `converted_*` triple is an optional
//! secondary artifact produced by a successful compression pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-guild usage counters for a file.
///
/// Entries are created lazily on first send; `last_sent` stays `None`
/// until then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildUsage {
    #[serde(default)]
    pub send_count: u64,
    #[serde(default)]
    pub last_sent: Option<DateTime<Utc>>,
}

/// A tracked file in the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Surrogate key, assigned by the store. `None` until inserted.
    #[serde(default)]
    pub id: Option<i64>,
    /// Lowercase hex SHA-256 over the full file bytes. Unique.
    pub file_hash: String,
    /// Canonical artifact location, relative to the data root.
    pub file_path: PathBuf,
    /// Byte length of the canonical artifact.
    pub file_size: u64,
    /// Compressed artifact triple. All-or-nothing: either every field is
    /// set (a compression pass succeeded) or none is.
    #[serde(default)]
    pub converted_path: Option<PathBuf>,
    #[serde(default)]
    pub converted_hash: Option<String>,
    #[serde(default)]
    pub converted_size: Option<u64>,
    /// Logical bucket; must be one of the configured category names.
    pub category: String,
    /// Guild id -> usage counters, persisted as a JSON text column.
    #[serde(default)]
    pub guild_usage: BTreeMap<String, GuildUsage>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh, not-yet-inserted record.
    pub fn new(
        file_path: PathBuf,
        file_hash: String,
        file_size: u64,
        category: String,
    ) -> Self {
        Self {
            id: None,
            file_hash,
            file_path,
            file_size,
            converted_path: None,
            converted_hash: None,
            converted_size: None,
            category,
            guild_usage: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether a compression pass has produced a secondary artifact.
    pub fn has_converted(&self) -> bool {
        self.converted_size.is_some()
    }

    /// Effective size for the size-limit check: the converted artifact
    /// when present, otherwise the canonical one.
    pub fn effective_size(&self) -> u64 {
        self.converted_size.unwrap_or(self.file_size)
    }

    /// Whether this record can be served within `max_size` bytes.
    pub fn within_limit(&self, max_size: u64) -> bool {
        self.effective_size() <= max_size
    }

    /// The path to serve given `max_size`: the converted artifact iff the
    /// canonical one is over the limit and the converted one fits.
    pub fn serving_path(&self, max_size: u64) -> &PathBuf {
        match (&self.converted_path, self.converted_size) {
            (Some(converted), Some(size))
                if self.converted_hash.is_some()
                    && self.file_size > max_size
                    && size <= max_size =>
            {
                converted
            }
            _ => &self.file_path,
        }
    }

    /// The hash identifying the served artifact for `max_size`.
    pub fn serving_hash(&self, max_size: u64) -> &str {
        if self.serving_path(max_size) == &self.file_path {
            &self.file_hash
        } else {
            self.converted_hash.as_deref().unwrap_or(&self.file_hash)
        }
    }
}
