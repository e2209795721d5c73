//! SQLite record store
//!
//! Durable, concurrency-safe persistence of [`FileRecord`] entries.
//!
//! ## Schema
//!
//! One `file_tracking` table keyed by a surrogate id, with a UNIQUE
//! content hash, the optional converted-artifact triple, and per-guild
//! usage counters in a JSON text column. Indexes on `file_hash`,
//! `converted_hash` and `category` back the point lookups and category
//! scans.
//!
//! ## Concurrency
//!
//! Usage-counter updates are a single `json_set` upsert statement with
//! `RETURNING`, never a read-modify-write across two round trips, so
//! concurrent increments for distinct guilds on the same row are all
//! reflected. Same-row same-guild increments serialize on SQLite's own
//! row locking.

use crate::error::{AppError, Result};
use crate::models::record::{FileRecord, GuildUsage};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Async handle to the file-tracking database.
#[derive(Clone)]
pub struct FileDatabase {
    pool: SqlitePool,
}

/// Strip root/prefix components so stored paths stay machine-portable.
fn storable_path(path: &Path) -> String {
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    relative.to_string_lossy().into_owned()
}

/// Convert a size to the store's native integer range, or fail the whole
/// operation before any row is touched.
fn storable_size(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| AppError::SizeOverflow(size))
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord> {
    let map_db = |e: sqlx::Error| AppError::database(format!("failed to read row: {e}"));

    let created_raw: String = row.try_get("created_at").map_err(map_db)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map_err(|e| AppError::database(format!("invalid created_at '{created_raw}': {e}")))?
        .with_timezone(&Utc);

    let usage_raw: String = row.try_get("guild_usage").map_err(map_db)?;
    let guild_usage: BTreeMap<String, GuildUsage> = serde_json::from_str(&usage_raw)
        .map_err(|e| AppError::database(format!("invalid guild_usage blob: {e}")))?;

    let file_size: i64 = row.try_get("file_size").map_err(map_db)?;
    let converted_size: Option<i64> = row.try_get("converted_size").map_err(map_db)?;
    let converted_path: Option<String> = row.try_get("converted_path").map_err(map_db)?;

    Ok(FileRecord {
        id: Some(row.try_get("id").map_err(map_db)?),
        file_hash: row.try_get("file_hash").map_err(map_db)?,
        file_path: PathBuf::from(row.try_get::<String, _>("file_path").map_err(map_db)?),
        file_size: file_size as u64,
        converted_path: converted_path.map(PathBuf::from),
        converted_hash: row.try_get("converted_hash").map_err(map_db)?,
        converted_size: converted_size.map(|s| s as u64),
        category: row.try_get("category").map_err(map_db)?,
        guild_usage,
        created_at,
    })
}

/// Map a sqlx error to the store's taxonomy; `hash` names the record the
/// statement was about so a uniqueness violation can carry it.
fn map_insert_error(e: sqlx::Error, hash: &str) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return AppError::DuplicateHash(hash.to_string());
        }
    }
    AppError::database(format!("insert failed: {e}"))
}

impl FileDatabase {
    /// Open (and create if missing) the database at `path`.
    ///
    /// Enables WAL for concurrent reads alongside the single writer, and
    /// a busy timeout so short writer contention resolves itself instead
    /// of surfacing as an error.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", path.display());

        info!(path = %path.display(), "opening record store");

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&db_url)
            .await
            .map_err(|e| AppError::database(format!("failed to connect: {e}")))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("failed to enable WAL mode: {e}")))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("failed to set synchronous mode: {e}")))?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("failed to set busy timeout: {e}")))?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_tracking (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_hash TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                converted_path TEXT,
                converted_hash TEXT,
                converted_size INTEGER,
                category TEXT NOT NULL,
                guild_usage TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::database(format!("failed to create file_tracking table: {e}")))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_file_hash ON file_tracking (file_hash)",
            "CREATE INDEX IF NOT EXISTS idx_converted_hash ON file_tracking (converted_hash)",
            "CREATE INDEX IF NOT EXISTS idx_category ON file_tracking (category)",
        ] {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| AppError::database(format!("failed to create index: {e}")))?;
        }

        info!("record store schema initialized");
        Ok(())
    }

    /// Insert a new record. Fails with [`AppError::DuplicateHash`] when
    /// the content hash is already tracked.
    ///
    /// Returns the auto-assigned surrogate key.
    pub async fn insert(&self, record: &FileRecord) -> Result<i64> {
        let file_size = storable_size(record.file_size)?;
        let converted_size = record.converted_size.map(storable_size).transpose()?;
        let guild_usage = serde_json::to_string(&record.guild_usage)
            .map_err(|e| AppError::database(format!("failed to encode guild_usage: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO file_tracking (
                file_hash, file_path, file_size, converted_path,
                converted_hash, converted_size, category, guild_usage, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING id
            "#,
        )
        .bind(&record.file_hash)
        .bind(storable_path(&record.file_path))
        .bind(file_size)
        .bind(record.converted_path.as_deref().map(storable_path))
        .bind(&record.converted_hash)
        .bind(converted_size)
        .bind(&record.category)
        .bind(guild_usage)
        .bind(record.created_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &record.file_hash))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| AppError::database(format!("failed to read inserted id: {e}")))?;
        debug!(hash = %record.file_hash, id, "inserted file record");
        Ok(id)
    }

    /// Insert several records atomically. Any failure (duplicate hash,
    /// size overflow) aborts the whole batch with no partial commit.
    pub async fn insert_batch(&self, records: &[FileRecord]) -> Result<()> {
        // Validate sizes before opening the transaction so an overflow
        // fails with zero side effects.
        for record in records {
            storable_size(record.file_size)?;
            if let Some(size) = record.converted_size {
                storable_size(size)?;
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("failed to begin transaction: {e}")))?;

        for record in records {
            let guild_usage = serde_json::to_string(&record.guild_usage)
                .map_err(|e| AppError::database(format!("failed to encode guild_usage: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO file_tracking (
                    file_hash, file_path, file_size, converted_path,
                    converted_hash, converted_size, category, guild_usage, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&record.file_hash)
            .bind(storable_path(&record.file_path))
            .bind(storable_size(record.file_size)?)
            .bind(record.converted_path.as_deref().map(storable_path))
            .bind(&record.converted_hash)
            .bind(record.converted_size.map(storable_size).transpose()?)
            .bind(&record.category)
            .bind(guild_usage)
            .bind(record.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, &record.file_hash))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("failed to commit batch: {e}")))?;
        debug!(count = records.len(), "batch insert committed");
        Ok(())
    }

    /// Look up a record by content hash.
    ///
    /// Also resolves when `hash` matches a record's `converted_hash`, so
    /// callers holding the hash of a compressed artifact find its record.
    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT * FROM file_tracking WHERE file_hash = ?1 OR converted_hash = ?1 LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("hash lookup failed: {e}")))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Look up a record by its canonical path.
    pub async fn get_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM file_tracking WHERE file_path = ?1")
            .bind(storable_path(path))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("path lookup failed: {e}")))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Records whose file name contains `fragment`. Empty result, not an
    /// error, when nothing matches.
    pub async fn get_by_filename_substring(&self, fragment: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM file_tracking WHERE file_path LIKE '%' || ?1 || '%'",
        )
        .bind(fragment)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("filename search failed: {e}")))?;

        // LIKE matched anywhere in the stored path; narrow to the file
        // name component here.
        let mut records = Vec::new();
        for row in &rows {
            let record = record_from_row(row)?;
            let matches = record
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().contains(fragment))
                .unwrap_or(false);
            if matches {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of records in a category.
    pub async fn count_by_category(&self, category: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM file_tracking WHERE category = ?1")
            .bind(category)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("count failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| AppError::database(format!("count failed: {e}")))?;
        Ok(n as u64)
    }

    /// Records whose canonical artifact is larger than `size` bytes.
    pub async fn list_larger_than(&self, size: u64) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM file_tracking WHERE file_size > ?1")
            .bind(storable_size(size)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("size scan failed: {e}")))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records in `category` the given guild has never been sent
    /// (no usage entry, or an entry with a zero send count).
    pub async fn list_unsent(&self, guild_id: &str, category: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM file_tracking
            WHERE category = ?1
            AND (
                json_extract(guild_usage, '$."' || ?2 || '"') IS NULL
                OR json_extract(guild_usage, '$."' || ?2 || '".send_count') = 0
            )
            "#,
        )
        .bind(category)
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("unsent query failed: {e}")))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Atomically create-or-increment the guild's usage entry and stamp
    /// its `last_sent`, returning the post-update record.
    ///
    /// One statement end to end: concurrent increments for distinct
    /// guilds on the same row must each be reflected, so the usage map is
    /// never loaded, mutated and written back. Returns `None` with no
    /// side effects when the hash is unknown.
    pub async fn increment_send_count(
        &self,
        hash: &str,
        guild_id: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE file_tracking SET
                guild_usage = json_set(
                    guild_usage,
                    '$."' || ?1 || '".send_count',
                    COALESCE(json_extract(guild_usage, '$."' || ?1 || '".send_count'), 0) + 1,
                    '$."' || ?1 || '".last_sent',
                    strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                )
            WHERE file_hash = ?2
            RETURNING *
            "#,
        )
        .bind(guild_id)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("send-count increment failed: {e}")))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Set the converted-artifact triple for a record. All three fields
    /// are written together; the triple is never partially populated.
    pub async fn update_converted(
        &self,
        hash: &str,
        converted_path: &Path,
        converted_hash: &str,
        converted_size: u64,
    ) -> Result<Option<FileRecord>> {
        let size = storable_size(converted_size)?;
        let row = sqlx::query(
            r#"
            UPDATE file_tracking SET
                converted_path = ?1,
                converted_hash = ?2,
                converted_size = ?3
            WHERE file_hash = ?4
            RETURNING *
            "#,
        )
        .bind(storable_path(converted_path))
        .bind(converted_hash)
        .bind(size)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("converted update failed: {e}")))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Clear the converted-artifact triple (all three fields at once).
    pub async fn clear_converted(&self, hash: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE file_tracking SET
                converted_path = NULL,
                converted_hash = NULL,
                converted_size = NULL
            WHERE file_hash = ?1
            RETURNING *
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("converted clear failed: {e}")))?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Delete by content hash. Returns whether a row was removed.
    pub async fn delete_by_hash(&self, hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_tracking WHERE file_hash = ?1")
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("delete failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete by canonical path. Returns whether a row was removed.
    pub async fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_tracking WHERE file_path = ?1")
            .bind(storable_path(path))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("delete failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// All tracked content hashes.
    pub async fn all_hashes(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT file_hash FROM file_tracking")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("hash scan failed: {e}")))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("file_hash")
                    .map_err(|e| AppError::database(format!("hash scan failed: {e}")))
            })
            .collect()
    }

    /// All canonical paths recorded for a category.
    pub async fn all_paths(&self, category: &str) -> Result<HashSet<PathBuf>> {
        let rows = sqlx::query("SELECT file_path FROM file_tracking WHERE category = ?1")
            .bind(category)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("path scan failed: {e}")))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("file_path")
                    .map(PathBuf::from)
                    .map_err(|e| AppError::database(format!("path scan failed: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db(dir: &TempDir) -> FileDatabase {
        FileDatabase::open(&dir.path().join("files.db")).await.unwrap()
    }

    fn sample(hash: &str) -> FileRecord {
        FileRecord::new(
            PathBuf::from("memes/doge.png"),
            hash.to_string(),
            1024,
            "meme".to_string(),
        )
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_roundtrips() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let record = sample(&"a".repeat(64));
        let id = db.insert(&record).await.unwrap();
        assert!(id > 0);

        let fetched = db.get_by_hash(&record.file_hash).await.unwrap().unwrap();
        assert_eq!(fetched.id, Some(id));
        assert_eq!(fetched.file_path, PathBuf::from("memes/doge.png"));
        assert_eq!(fetched.file_size, 1024);
        assert!(fetched.guild_usage.is_empty());
        assert_eq!(
            fetched.created_at.timestamp(),
            record.created_at.timestamp()
        );
    }

    #[tokio::test]
    async fn test_duplicate_hash_is_a_distinct_error() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let record = sample(&"a".repeat(64));
        db.insert(&record).await.unwrap();
        let err = db.insert(&record).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateHash(_)));
    }

    #[tokio::test]
    async fn test_absolute_paths_stored_relative() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let mut record = sample(&"b".repeat(64));
        record.file_path = PathBuf::from("/absolute/path/to/file.png");
        db.insert(&record).await.unwrap();

        let fetched = db.get_by_hash(&record.file_hash).await.unwrap().unwrap();
        assert!(!fetched.file_path.is_absolute());
        assert_eq!(fetched.file_path, PathBuf::from("absolute/path/to/file.png"));
    }

    #[tokio::test]
    async fn test_converted_triple_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let record = sample(&"c".repeat(64));
        db.insert(&record).await.unwrap();

        let updated = db
            .update_converted(
                &record.file_hash,
                Path::new("converted/doge_compressed.png"),
                &"d".repeat(64),
                512,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.converted_path.is_some());
        assert!(updated.converted_hash.is_some());
        assert_eq!(updated.converted_size, Some(512));

        let cleared = db.clear_converted(&record.file_hash).await.unwrap().unwrap();
        assert!(cleared.converted_path.is_none());
        assert!(cleared.converted_hash.is_none());
        assert!(cleared.converted_size.is_none());
    }

    #[tokio::test]
    async fn test_get_by_hash_resolves_converted_hash() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let record = sample(&"e".repeat(64));
        db.insert(&record).await.unwrap();
        db.update_converted(
            &record.file_hash,
            Path::new("converted/doge_compressed.png"),
            &"f".repeat(64),
            512,
        )
        .await
        .unwrap();

        let via_converted = db.get_by_hash(&"f".repeat(64)).await.unwrap().unwrap();
        assert_eq!(via_converted.file_hash, record.file_hash);
    }

    #[tokio::test]
    async fn test_size_overflow_rejected_before_commit() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let mut record = sample(&"1".repeat(64));
        record.file_size = 1 << 62;
        db.insert(&record).await.unwrap();

        let mut oversized = sample(&"2".repeat(64));
        oversized.file_size = u64::MAX;
        let err = db.insert(&oversized).await.unwrap_err();
        assert!(matches!(err, AppError::SizeOverflow(_)));

        // The earlier row is untouched.
        assert!(db.get_by_hash(&"1".repeat(64)).await.unwrap().is_some());
        assert!(db.get_by_hash(&"2".repeat(64)).await.unwrap().is_none());
    }
}
