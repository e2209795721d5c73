//! Disk / record-store reconciliation
//!
//! Walks the configured category directories, hashes files the store
//! does not know yet, deduplicates by content hash within the scan,
//! batch-inserts the survivors and prunes records whose on-disk file
//! vanished (unless a converted artifact survives it).

use crate::compress::is_compressed_artifact;
use crate::config::{AppConfig, CategoryDir};
use crate::error::Result;
use crate::models::record::FileRecord;
use crate::storage::FileDatabase;
use crate::utils::fs as vfs;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// What one synchronization pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files seen on disk across all category directories.
    pub scanned: usize,
    /// New records inserted.
    pub inserted: usize,
    /// On-disk duplicates dropped within this scan (same hash, another
    /// path).
    pub duplicates: usize,
    /// Candidates dropped because the store already tracks their hash.
    pub already_tracked: usize,
    /// Records deleted because their file is gone and nothing survives.
    pub removed: usize,
    /// Records kept despite a missing original because a converted
    /// artifact survives.
    pub retained: usize,
}

/// Reconciles category directories with the record store.
pub struct FileSynchronizer {
    db: FileDatabase,
    config: AppConfig,
}

impl FileSynchronizer {
    /// The synchronizer does not own the database lifecycle; the handle
    /// must already be connected.
    pub fn new(db: FileDatabase, config: AppConfig) -> Self {
        Self { db, config }
    }

    /// Run one full reconciliation pass.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        info!("starting file synchronization");
        let mut report = SyncReport::default();

        let mut candidates = Vec::new();
        for category in &self.config.categories {
            candidates.extend(self.scan_category(category, &mut report).await?);
        }

        let unique = self.deduplicate(candidates, &mut report);

        let known_hashes = self.db.all_hashes().await?;
        let mut fresh = Vec::new();
        for record in unique {
            if known_hashes.contains(&record.file_hash) {
                debug!(
                    path = %record.file_path.display(),
                    hash = %record.file_hash,
                    "content already tracked, skipping"
                );
                report.already_tracked += 1;
            } else {
                fresh.push(record);
            }
        }

        if fresh.is_empty() {
            info!("no new files to insert");
        } else {
            info!(count = fresh.len(), "inserting new file records");
            self.db.insert_batch(&fresh).await?;
            report.inserted = fresh.len();
        }

        self.prune_missing(&mut report).await?;

        info!(
            scanned = report.scanned,
            inserted = report.inserted,
            duplicates = report.duplicates,
            removed = report.removed,
            retained = report.retained,
            "synchronization finished"
        );
        Ok(report)
    }

    /// Enumerate one category directory and build candidate records for
    /// paths the store does not know.
    async fn scan_category(
        &self,
        category: &CategoryDir,
        report: &mut SyncReport,
    ) -> Result<Vec<FileRecord>> {
        let dir = self.config.category_dir(category);
        debug!(dir = %dir.display(), category = %category.name, "scanning directory");

        let mut disk_files = vfs::collect_files(&dir).await?;
        // Compression artifacts are pipeline-internal, never candidates.
        disk_files.retain(|path| !is_compressed_artifact(path));
        report.scanned += disk_files.len();

        let db_count = self.db.count_by_category(&category.name).await? as usize;
        if disk_files.len() == db_count {
            // A matching count does not prove the paths are the same
            // files, so it is a hint only; the scan still runs.
            debug!(
                category = %category.name,
                count = db_count,
                "disk and store counts match, scanning for path drift anyway"
            );
        } else {
            debug!(
                category = %category.name,
                disk = disk_files.len(),
                db = db_count,
                "count mismatch detected"
            );
        }

        let existing_paths = self.db.all_paths(&category.name).await?;
        let mut candidates = Vec::new();
        for path in disk_files {
            let relative = self.config.relativize(&path).to_path_buf();
            if existing_paths.contains(&relative) {
                continue;
            }
            debug!(path = %relative.display(), "new file detected");
            let file_hash = vfs::hash_file(&path).await?;
            let file_size = vfs::file_size(&path).await?;
            candidates.push(FileRecord::new(
                relative,
                file_hash,
                file_size,
                category.name.clone(),
            ));
        }
        Ok(candidates)
    }

    /// Keep exactly one candidate per hash — the first encountered in
    /// enumeration order — and log the rest as duplicates.
    fn deduplicate(
        &self,
        candidates: Vec<FileRecord>,
        report: &mut SyncReport,
    ) -> Vec<FileRecord> {
        let mut first_seen: HashMap<String, FileRecord> = HashMap::new();
        let mut order = Vec::new();
        for record in candidates {
            match first_seen.get(&record.file_hash) {
                Some(kept) => {
                    warn!(
                        hash = %record.file_hash,
                        duplicate = %record.file_path.display(),
                        kept = %kept.file_path.display(),
                        "duplicate content on disk, keeping first occurrence"
                    );
                    report.duplicates += 1;
                }
                None => {
                    order.push(record.file_hash.clone());
                    first_seen.insert(record.file_hash.clone(), record);
                }
            }
        }
        order
            .into_iter()
            .filter_map(|hash| first_seen.remove(&hash))
            .collect()
    }

    /// Drop records whose canonical file disappeared, keeping those with
    /// a surviving converted artifact.
    async fn prune_missing(&self, report: &mut SyncReport) -> Result<()> {
        for category in &self.config.categories {
            for path in self.db.all_paths(&category.name).await? {
                // Double-check right before acting: the path may have
                // reappeared since the directory walk.
                if vfs::file_exists(&self.config.resolve(&path)).await {
                    continue;
                }
                let Some(record) = self.db.get_by_path(&path).await? else {
                    continue;
                };
                let converted_survives = match &record.converted_path {
                    Some(converted) => vfs::file_exists(&self.config.resolve(converted)).await,
                    None => false,
                };
                if converted_survives {
                    debug!(
                        path = %path.display(),
                        "original missing but converted artifact survives, keeping record"
                    );
                    report.retained += 1;
                } else {
                    warn!(path = %path.display(), "file missing from disk, deleting record");
                    if self.db.delete_by_path(&path).await? {
                        report.removed += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
