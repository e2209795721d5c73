//! File manager facade
//!
//! The operations the interaction layer calls into: staging attachment
//! downloads, fetching unsent or identified files, compressing oversized
//! ones, and the compensating deletes for failed multi-step adds. The
//! Discord side renders the returned records or errors; nothing in here
//! touches that API.

use crate::compress;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::record::FileRecord;
use crate::storage::FileDatabase;
use crate::utils::fs as vfs;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct FileManager {
    db: FileDatabase,
    config: AppConfig,
}

impl FileManager {
    pub fn new(db: FileDatabase, config: AppConfig) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &FileDatabase {
        &self.db
    }

    /// Stage downloaded attachment bytes as a file in the category's
    /// directory and build its (not yet inserted) record.
    ///
    /// Fails with a validation error on an unknown category. Duplicate
    /// content is the store's concern: committing the record later fails
    /// with [`AppError::DuplicateHash`] if the hash is already tracked.
    pub async fn add_from_bytes(
        &self,
        bytes: &[u8],
        original_name: &str,
        category: &str,
    ) -> Result<FileRecord> {
        let category = self
            .config
            .category(category)
            .ok_or_else(|| AppError::validation(format!("unknown category '{category}'")))?;

        let file_hash = vfs::hash_bytes(bytes);
        let name = Path::new(original_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let dir = self.config.category_dir(category);
        let mut target = dir.join(&name);
        if vfs::file_exists(&target).await {
            // Another file already owns this name; disambiguate with a
            // hash prefix rather than overwriting it.
            target = dir.join(format!("{}_{name}", &file_hash[..8]));
        }
        vfs::write_file(&target, bytes).await?;
        info!(path = %target.display(), size = bytes.len(), "staged attachment");

        Ok(FileRecord::new(
            self.config.relativize(&target).to_path_buf(),
            file_hash,
            bytes.len() as u64,
            category.name.clone(),
        ))
    }

    /// Commit a staged record to the store, returning it with its id.
    pub async fn insert_record(&self, record: &FileRecord) -> Result<FileRecord> {
        if self.config.category(&record.category).is_none() {
            return Err(AppError::validation(format!(
                "unknown category '{}'",
                record.category
            )));
        }
        let id = self.db.insert(record).await?;
        let mut committed = record.clone();
        committed.id = Some(id);
        Ok(committed)
    }

    /// A random record of `category` the guild has not been sent yet.
    pub async fn fetch_unsent(&self, guild_id: &str, category: &str) -> Result<Option<FileRecord>> {
        let unsent = self.db.list_unsent(guild_id, category).await?;
        let pick = {
            let mut rng = rand::thread_rng();
            unsent.choose(&mut rng).cloned()
        };
        Ok(pick)
    }

    /// Find a record by identifier within a category: content hash
    /// first (converted hashes resolve too), then file-name substring.
    pub async fn find(&self, identifier: &str, category: &str) -> Result<Option<FileRecord>> {
        if let Some(record) = self.db.get_by_hash(identifier).await? {
            if record.category == category {
                return Ok(Some(record));
            }
        }
        let matches = self.db.get_by_filename_substring(identifier).await?;
        Ok(matches.into_iter().find(|r| r.category == category))
    }

    /// Record that `guild_id` was sent the file identified by `hash`.
    pub async fn increment_send_count(
        &self,
        hash: &str,
        guild_id: &str,
    ) -> Result<Option<FileRecord>> {
        self.db.increment_send_count(hash, guild_id).await
    }

    /// Compress a record's canonical file to the configured size budget
    /// and store the converted triple.
    ///
    /// The artifact is moved into the converted directory; on any
    /// failure no converted fields are written and scratch output is
    /// already cleaned up by the engine.
    pub async fn compress_record(&self, record: &FileRecord) -> Result<FileRecord> {
        let source = self.config.resolve(&record.file_path);
        let artifact = compress::compress_file(&source, self.config.max_file_size).await?;

        let converted_hash = vfs::hash_file(&artifact).await?;
        let converted_size = vfs::file_size(&artifact).await?;

        let file_name = artifact
            .file_name()
            .ok_or_else(|| AppError::internal("compression produced a nameless artifact"))?;
        let destination = self.config.converted_dir.join(file_name);
        tokio::fs::create_dir_all(&self.config.converted_dir).await?;
        tokio::fs::rename(&artifact, &destination).await?;
        let relative = self.config.relativize(&destination).to_path_buf();

        debug!(
            hash = %record.file_hash,
            artifact = %relative.display(),
            size = converted_size,
            "storing converted triple"
        );
        self.db
            .update_converted(&record.file_hash, &relative, &converted_hash, converted_size)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("record vanished during compression: {}", record.file_hash))
            })
    }

    /// Compensating delete after a failed multi-step add: remove the
    /// staged file (and any converted artifact) and the row if one was
    /// committed.
    pub async fn delete_record(&self, record: &FileRecord) -> Result<()> {
        vfs::remove_file(&self.config.resolve(&record.file_path)).await?;
        if let Some(converted) = &record.converted_path {
            vfs::remove_file(&self.config.resolve(converted)).await?;
        }
        let removed = self.db.delete_by_hash(&record.file_hash).await?;
        debug!(
            hash = %record.file_hash,
            row_removed = removed,
            "deleted file record"
        );
        Ok(())
    }

    /// Remove the oversized original once a converted artifact exists.
    /// The record stays queryable and servable through the artifact.
    pub async fn delete_original(&self, record: &FileRecord) -> Result<()> {
        if !record.has_converted() {
            return Err(AppError::validation(
                "refusing to delete an original with no converted artifact".to_string(),
            ));
        }
        vfs::remove_file(&self.config.resolve(&record.file_path)).await?;
        info!(path = %record.file_path.display(), "removed oversized original");
        Ok(())
    }

    /// Whether the record can be served under the configured size limit.
    pub fn within_limit(&self, record: &FileRecord) -> bool {
        record.within_limit(self.config.max_file_size)
    }

    /// On-disk path to serve for this record (converted artifact when
    /// the original is over the limit and the artifact fits).
    pub fn serving_path(&self, record: &FileRecord) -> PathBuf {
        let path = record.serving_path(self.config.max_file_size);
        let resolved = self.config.resolve(path);
        if path != &record.file_path {
            debug!(path = %resolved.display(), "serving converted artifact");
        }
        resolved
    }
}
